//! `.tar.bz2` archive creation.

use crate::error::Result;
use crate::models::BuildStamp;
use bzip2::write::BzEncoder;
use bzip2::Compression;

/// Packs one rule file into an archive.
pub trait Archiver: Send + Sync {
    /// Archive `contents` as a single entry named `entry_name`.
    fn archive(&self, entry_name: &str, contents: &[u8], stamp: &BuildStamp) -> Result<Vec<u8>>;

    /// Archive file extension, without the leading dot.
    fn extension(&self) -> &'static str;
}

/// bzip2-compressed tarball, built in memory.
///
/// Entry metadata is fixed (mode 0644, root owner, mtime = build time) so the
/// archive depends only on the rule file and the build stamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarBz2Archiver;

impl Archiver for TarBz2Archiver {
    fn archive(&self, entry_name: &str, contents: &[u8], stamp: &BuildStamp) -> Result<Vec<u8>> {
        let encoder = BzEncoder::new(Vec::new(), Compression::best());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_ustar();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(u64::try_from(stamp.serial).unwrap_or(0));
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, entry_name, contents)?;

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }

    fn extension(&self) -> &'static str {
        "tar.bz2"
    }
}
