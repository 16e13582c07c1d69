use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Result, StorageError};

pub const PAGE_SIZE: usize = 4096;

/// An open paged file. Every page is read and written whole; there is no
/// partial-page I/O and no buffering beyond the OS page cache.
pub struct PagedFile {
    file: File,
    filename: PathBuf,
    num_pages: u32,
}

impl PagedFile {
    fn open_handle(path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(StorageError::Io)
    }

    fn num_pages_on_disk(file: &File) -> Result<u32> {
        let len = file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn read_page(&mut self, page_num: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if page_num >= self.num_pages {
            return Err(StorageError::PageNumInvalid(page_num));
        }
        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))
            .map_err(|_| StorageError::FileSeekFailed)?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_num: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_num >= self.num_pages {
            return Err(StorageError::PageNumInvalid(page_num));
        }
        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))
            .map_err(|_| StorageError::FileSeekFailed)?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn append_page(&mut self, buf: &[u8; PAGE_SIZE]) -> Result<u32> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        let new_page_num = self.num_pages;
        self.num_pages += 1;
        Ok(new_page_num)
    }
}

/// Tracks which files currently have an open handle as an explicit, owned
/// registry struct rather than a hidden global singleton. Construct one per
/// process (or per test) and pass it around.
pub struct PagedFileManager {
    open_handles: HashMap<String, ()>,
}

impl PagedFileManager {
    pub fn new() -> Self {
        PagedFileManager {
            open_handles: HashMap::new(),
        }
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StorageError::FileAlreadyExists(
                path.display().to_string(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        debug!("created paged file {}", path.display());
        drop(file);
        Ok(())
    }

    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<PagedFile> {
        let path = path.as_ref();
        let key = path.display().to_string();
        if self.open_handles.contains_key(&key) {
            return Err(StorageError::HandleAlreadyInitialized(key));
        }
        if !path.exists() {
            return Err(StorageError::FileNotFound(key));
        }
        let file = PagedFile::open_handle(path)?;
        let num_pages = PagedFile::num_pages_on_disk(&file)?;
        self.open_handles.insert(key.clone(), ());
        debug!("opened paged file {key} with {num_pages} pages");
        Ok(PagedFile {
            file,
            filename: path.to_path_buf(),
            num_pages,
        })
    }

    pub fn close_file(&mut self, handle: PagedFile) -> Result<()> {
        let key = handle.filename.display().to_string();
        if self.open_handles.remove(&key).is_none() {
            warn!("closing a file with no tracked handle: {key}");
        }
        drop(handle);
        Ok(())
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}
