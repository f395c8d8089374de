use std::path::PathBuf;

use anyhow::{Error, Result, anyhow};

use crate::bencoding::Value;

#[derive(Debug, PartialEq, Clone)]
pub enum DownloadType {
    SingleFile {
        name: String,
        size: u64,
    },
    MultiFile {
        directory_name: String,
        files: Vec<File>,
    },
}

impl DownloadType {
    pub fn name(&self) -> &str {
        match self {
            Self::SingleFile { name, .. } => name,
            Self::MultiFile { directory_name, .. } => directory_name,
        }
    }

    /// Files in piece order, with paths relative to the storage root.
    pub fn files(&self) -> Vec<File> {
        match self {
            Self::SingleFile { name, size } => vec![File {
                path: PathBuf::from(name),
                size: *size,
            }],
            Self::MultiFile {
                directory_name,
                files,
            } => files
                .iter()
                .map(|file| File {
                    path: PathBuf::from(directory_name).join(&file.path),
                    size: file.size,
                })
                .collect(),
        }
    }
}

impl TryFrom<Value> for DownloadType {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let name: String = value.remove_entry("name")?.try_into()?;
        check_path_component(&name)?;
        if let Some(length) = value.try_remove_entry("length")? {
            let size = length.try_into()?;
            return Ok(DownloadType::SingleFile { name, size });
        }

        if let Some(files) = value.try_remove_entry("files")? {
            let files: Vec<Value> = files.try_into()?;
            let mut result = Vec::with_capacity(files.len());
            for file in files {
                result.push(file.try_into()?);
            }
            return Ok(DownloadType::MultiFile {
                directory_name: name,
                files: result,
            });
        }

        Err(anyhow!("invalid metainfo"))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct File {
    pub path: PathBuf,
    pub size: u64,
}

impl TryFrom<Value> for File {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let size = value.remove_entry("length")?.try_into()?;
        let parts: Vec<Value> = value.remove_entry("path")?.try_into()?;
        if parts.is_empty() {
            return Err(anyhow!("empty file path"));
        }
        let mut path = PathBuf::with_capacity(parts.len());
        for part in parts {
            let part: String = part.try_into()?;
            check_path_component(&part)?;
            path.push(part);
        }
        Ok(File { size, path })
    }
}

/// Descriptors are untrusted, their paths must stay inside the storage root.
fn check_path_component(part: &str) -> Result<()> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(anyhow!("invalid path component \"{}\"", part));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_layout() {
        let download_type = DownloadType::try_from(
            Value::dictionary()
                .with_entry("name", Value::string("model.bin"))
                .with_entry("length", Value::Integer(5678)),
        )
        .unwrap();

        assert_eq!(
            download_type.files(),
            vec![File {
                path: PathBuf::from("model.bin"),
                size: 5678
            }]
        );
    }

    #[test]
    fn multi_file_layout() {
        let download_type = DownloadType::try_from(
            Value::dictionary()
                .with_entry("name", Value::string("root"))
                .with_entry(
                    "files",
                    Value::list()
                        .with_value(
                            Value::dictionary()
                                .with_entry("length", Value::Integer(12))
                                .with_entry(
                                    "path",
                                    Value::list()
                                        .with_value(Value::string("dir"))
                                        .with_value(Value::string("file1")),
                                ),
                        )
                        .with_value(
                            Value::dictionary()
                                .with_entry("length", Value::Integer(34))
                                .with_entry(
                                    "path",
                                    Value::list().with_value(Value::string("file2")),
                                ),
                        ),
                ),
        )
        .unwrap();

        let files = download_type.files();
        assert_eq!(download_type.name(), "root");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("root/dir/file1"));
        assert_eq!(files[0].size, 12);
        assert_eq!(files[1].path, PathBuf::from("root/file2"));
        assert_eq!(files[1].size, 34);
    }

    #[test]
    fn reject_path_traversal() {
        let result = DownloadType::try_from(
            Value::dictionary()
                .with_entry("name", Value::string("root"))
                .with_entry(
                    "files",
                    Value::list().with_value(
                        Value::dictionary()
                            .with_entry("length", Value::Integer(1))
                            .with_entry("path", Value::list().with_value(Value::string(".."))),
                    ),
                ),
        );

        assert!(result.is_err());
    }
}
