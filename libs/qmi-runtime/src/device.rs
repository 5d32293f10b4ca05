//! Device: the opaque byte-stream handle to a QMI character device
//!
//! Open-exclusive + no-controlling-tty semantics (§6). `O_EXCL` on an
//! already-existing special file is advisory at best — the kernel does not
//! guarantee single-owner enforcement for character devices the way it
//! does for regular file creation — but it is still requested so a second
//! open attempt fails fast rather than silently sharing the device.

use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;
use tokio::fs::File;

pub async fn open(path: &Path) -> io::Result<File> {
    let flags = (OFlag::O_NOCTTY | OFlag::O_EXCL).bits();
    let path = path.to_path_buf();
    let std_file =
        tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(flags)
                .open(&path)
        })
        .await
        .expect("blocking open task panicked")?;
    Ok(File::from_std(std_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn opens_an_existing_path_for_read_and_write() {
        let tmp = tempfile::NamedTempFile::new().expect("create scratch file");
        let mut file = open(tmp.path()).await.expect("open should succeed");
        file.write_all(b"ok").await.expect("write should succeed");
    }

    #[tokio::test]
    async fn missing_path_fails_with_not_found() {
        let missing = Path::new("/nonexistent/not-a-qmi-device");
        let err = open(missing).await.expect_err("missing path must not open");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
