//! `FileImageReader`: the only concrete `ImageReader` this CLI ships,
//! backing the `--image <file>` flag.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use mdfu_proto::ImageReader;

pub struct FileImageReader {
    path: PathBuf,
    file: Option<File>,
}

impl FileImageReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileImageReader { path: path.as_ref().to_path_buf(), file: None }
    }
}

impl ImageReader for FileImageReader {
    fn open(&mut self) -> std::io::Result<()> {
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.file = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let file = self.file.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "image file is not open")
        })?;
        file.read(buf)
    }
}
