use std::path::PathBuf;

use rattler_extents::{read_container, read_signature_verification, read_source_digests};

/// Show the trailing records of an extents container
#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The payload to inspect
    payload: PathBuf,

    /// Also list every entry of the digest table
    #[clap(long)]
    table: bool,
}

pub fn info(opt: Opt) -> anyhow::Result<()> {
    let mut file = fs_err::File::open(&opt.payload)?;

    let Some(container) = read_container(&mut file)? else {
        println!("{} is not an extents container", opt.payload.display());
        return Ok(());
    };

    println!("container length:      {}", container.len);
    println!("verification offset:   {:#x}", container.footer.verification_offset);
    println!("table offset:          {:#x}", container.footer.table_offset);
    println!("source digests offset: {:#x}", container.footer.source_digests_offset);
    println!(
        "table:                 {} keys of {} bytes",
        container.table.len(),
        container.table.key_size()
    );

    if let Some(verification) = read_signature_verification(&mut file)? {
        println!(
            "verification:          code {} {}",
            verification.code,
            verification.message.trim()
        );
    }

    if let Some(source) = read_source_digests(&mut file)? {
        println!("source length:         {}", source.input_len);
        for (name, digest) in &source.digests {
            println!("source {name:<15} {digest}");
        }
    }

    if opt.table {
        for (digest, offset) in container.table.iter_sorted() {
            println!("{digest} {offset:#x}");
        }
    }

    Ok(())
}
