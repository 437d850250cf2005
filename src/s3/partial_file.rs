use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// An in-progress download; the final name only appears once the
/// whole body has been written.
pub struct PartialFile {
    pub writer: tokio::io::BufWriter<tokio::fs::File>,
    path_partial: PathBuf,
    path_final: PathBuf,
}

impl PartialFile {
    pub async fn new(path_final: PathBuf) -> Result<PartialFile, super::Error> {
        let mut path_string_temporary = path_final.as_os_str().to_owned();
        path_string_temporary.push(".pho3.partial");
        let path_partial = std::path::PathBuf::from(path_string_temporary);
        let local_file = tokio::fs::File::create(&path_partial).await?;
        Ok(PartialFile {
            writer: tokio::io::BufWriter::new(local_file),
            path_partial,
            path_final,
        })
    }
    pub async fn finished(mut self) -> Result<PathBuf, super::Error> {
        self.writer.shutdown().await?;
        tokio::fs::rename(&self.path_partial, &self.path_final).await?;
        Ok(self.path_final)
    }
    pub async fn cancelled(self) -> Result<(), super::Error> {
        {
            let mut file = self.writer.into_inner();
            file.flush().await?;
        }
        tokio::fs::remove_file(&self.path_partial).await?;
        Ok(())
    }
}

#[tokio::test]
async fn finished_renames_into_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("cat.jpg");
    let mut partial = PartialFile::new(target.clone()).await.expect("create");
    partial.writer.write_all(b"meow").await.expect("write");
    let path = partial.finished().await.expect("rename");
    assert_eq!(path, target);
    assert_eq!(std::fs::read(&target).expect("final file"), b"meow");
    assert!(!dir.path().join("cat.jpg.pho3.partial").exists());
}

#[tokio::test]
async fn cancelled_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("cat.jpg");
    let mut partial = PartialFile::new(target).await.expect("create");
    partial.writer.write_all(b"me").await.expect("write");
    partial.cancelled().await.expect("cleanup");
    assert!(std::fs::read_dir(dir.path()).expect("readdir").next().is_none());
}
