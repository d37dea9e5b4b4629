// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Streamed tar build contexts for image builds.
//!
//! Contexts are produced by a blocking tar writer feeding one end of an
//! in-memory duplex pipe while the HTTP client consumes the other end, so a
//! large challenge directory never has to fit in memory at once.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tokio_util::io::{ReaderStream, SyncIoBridge};

use crate::runtime::BuildContext;

/// Dockerfile used for solver images that do not ship their own.
pub(crate) const DEFAULT_SOLVER_DOCKERFILE: &[u8] = b"FROM python:3.12-slim
RUN pip install --no-cache-dir requests pwntools
COPY . /solve
WORKDIR /solve
CMD [\"python3\", \"solve.py\"]
";

const PIPE_CAPACITY: usize = 64 * 1024;

type TarBuilder = tar::Builder<SyncIoBridge<tokio::io::DuplexStream>>;

/// Run a tar producer on the blocking pool and return the archive as a
/// byte stream.
///
/// A producer error tears down the pipe early; the consumer then sees a
/// truncated archive and the image build fails with the runtime's own error.
fn spawn_tar<F>(producer: F) -> BuildContext
where
    F: FnOnce(&mut TarBuilder) -> io::Result<()> + Send + 'static,
{
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let bridge = SyncIoBridge::new(writer);
        let mut builder = tar::Builder::new(bridge);

        let result = producer(&mut builder)
            .and_then(|_| builder.into_inner())
            .and_then(|mut bridge| bridge.flush());

        if let Err(error) = result {
            tracing::error!(%error, "tar context producer failed");
        }
    });

    ReaderStream::new(reader)
}

/// Build context for a challenge image: the challenge directory, with an
/// externally supplied Dockerfile template appended last when the challenge
/// type has one. Tar extraction is last-entry-wins, so the template shadows
/// any Dockerfile already in the directory.
pub(crate) fn challenge_context(
    dir: PathBuf,
    dockerfile: Option<Vec<u8>>,
) -> BuildContext {
    spawn_tar(move |builder| {
        builder.append_dir_all(".", &dir)?;
        if let Some(contents) = dockerfile {
            append_bytes(builder, "Dockerfile", &contents)?;
        }
        Ok(())
    })
}

/// Build context for a solver image: the `solver/` directory at the archive
/// root, the cached artifacts re-expanded beside it, a `metadata.json` with
/// per-instance data, and a default Dockerfile when the solver has none.
pub(crate) fn solver_context(
    solver_dir: PathBuf,
    artifacts: Option<PathBuf>,
    metadata: Vec<u8>,
) -> BuildContext {
    spawn_tar(move |builder| {
        let has_dockerfile = solver_dir.join("Dockerfile").is_file();
        builder.append_dir_all(".", &solver_dir)?;

        if let Some(archive_path) = artifacts {
            append_archive(builder, &archive_path)?;
        }

        append_bytes(builder, "metadata.json", &metadata)?;

        if !has_dockerfile {
            append_bytes(builder, "Dockerfile", DEFAULT_SOLVER_DOCKERFILE)?;
        }
        Ok(())
    })
}

fn append_bytes(builder: &mut TarBuilder, path: &str, contents: &[u8]) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, contents)
}

/// Re-expand a gzipped artifacts archive into the context being built.
fn append_archive(builder: &mut TarBuilder, path: &Path) -> io::Result<()> {
    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let mut header = entry.header().clone();
        let entry_path = entry.path()?.into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;

        builder.append_data(&mut header, entry_path, contents.as_slice())?;
    }

    Ok(())
}

/// Pull one file out of an in-memory tar archive by file name, wherever it
/// sits in the tree.
pub(crate) fn extract_entry(tar_bytes: &[u8], name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(tar_bytes);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let matches = entry
            .path()?
            .file_name()
            .is_some_and(|f| f == std::ffi::OsStr::new(name));
        if matches && entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(Some(contents));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    async fn collect(mut context: BuildContext) -> Vec<u8> {
        use futures::StreamExt;
        let mut bytes = Vec::new();
        while let Some(chunk) = context.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        bytes
    }

    fn entry_names(tar_bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(tar_bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_challenge_context_contains_directory_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("challenge.md"), "# hi").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.c"), "int main(){}").unwrap();

        let bytes = collect(challenge_context(dir.path().to_path_buf(), None)).await;
        let names = entry_names(&bytes);

        assert!(names.iter().any(|n| n.ends_with("challenge.md")));
        assert!(names.iter().any(|n| n.ends_with("src/main.c")));
        assert!(!names.iter().any(|n| n.ends_with("Dockerfile")));
    }

    #[tokio::test]
    async fn test_challenge_context_appends_template_last() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();

        let template = b"FROM alpine\n".to_vec();
        let bytes = collect(challenge_context(dir.path().to_path_buf(), Some(template))).await;
        let names = entry_names(&bytes);

        let dockerfiles: Vec<_> = names
            .iter()
            .filter(|n| n.ends_with("Dockerfile"))
            .collect();
        assert_eq!(dockerfiles.len(), 2);
        assert_eq!(names.last().map(|n| n.ends_with("Dockerfile")), Some(true));
    }

    #[tokio::test]
    async fn test_solver_context_injects_default_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("solve.py"), "print('x')").unwrap();

        let bytes = collect(solver_context(
            dir.path().to_path_buf(),
            None,
            b"{}".to_vec(),
        ))
        .await;
        let names = entry_names(&bytes);

        assert!(names.iter().any(|n| n.ends_with("solve.py")));
        assert!(names.iter().any(|n| n.ends_with("metadata.json")));
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
    }

    #[tokio::test]
    async fn test_solver_context_keeps_custom_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("solve.py"), "print('x')").unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM busybox").unwrap();

        let bytes = collect(solver_context(
            dir.path().to_path_buf(),
            None,
            b"{}".to_vec(),
        ))
        .await;
        let names = entry_names(&bytes);

        let dockerfiles: Vec<_> = names
            .iter()
            .filter(|n| n.ends_with("Dockerfile"))
            .collect();
        assert_eq!(dockerfiles.len(), 1);
    }

    #[test]
    fn test_extract_entry_finds_nested_file() {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"{\"a\":\"b\"}";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "challenge/metadata.json", data.as_slice())
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let found = extract_entry(&bytes, "metadata.json").unwrap();
        assert_eq!(found.as_deref(), Some(data.as_slice()));
        assert!(extract_entry(&bytes, "missing.bin").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_solver_context_expands_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("solve.py"), "print('x')").unwrap();

        // Build a small gzipped artifacts archive on disk.
        let artifacts_path = dir.path().join("artifacts.tar.gz");
        {
            let file = std::fs::File::create(&artifacts_path).unwrap();
            let mut builder =
                tar::Builder::new(GzEncoder::new(file, Compression::default()));
            let mut header = tar::Header::new_gnu();
            let data = b"binary bits";
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "handout.bin", data.as_slice())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let solver_dir = dir.path().join("solver");
        std::fs::create_dir(&solver_dir).unwrap();
        std::fs::write(solver_dir.join("solve.py"), "print('y')").unwrap();

        let bytes = collect(solver_context(
            solver_dir,
            Some(artifacts_path),
            b"{}".to_vec(),
        ))
        .await;
        let names = entry_names(&bytes);

        assert!(names.iter().any(|n| n.ends_with("handout.bin")));
    }
}
