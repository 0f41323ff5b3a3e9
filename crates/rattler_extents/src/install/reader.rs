use std::iter::FusedIterator;
use std::slice;

use crate::manifest::{FileEntry, PackageManifest};

/// Iterates the entries of an extents package in installation order.
///
/// Stands in for the archive reader of a plain package: the content of an extents package is not
/// read sequentially but placed per file, so listing the package only needs its manifest. Like an
/// archive stream it is single pass and can not be restarted.
#[derive(Debug)]
pub struct ManifestFiles<'m> {
    entries: slice::Iter<'m, FileEntry>,
}

impl<'m> ManifestFiles<'m> {
    pub(crate) fn new(manifest: &'m PackageManifest) -> Self {
        Self {
            entries: manifest.files.iter(),
        }
    }
}

impl<'m> Iterator for ManifestFiles<'m> {
    type Item = &'m FileEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for ManifestFiles<'_> {}

impl FusedIterator for ManifestFiles<'_> {}
