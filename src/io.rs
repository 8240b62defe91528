//! I/O utilities.

use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Read a whole text file, or standard input if `path` is `-`.
pub async fn read_text(path: &Path) -> Result<String> {
    let mut text = String::new();
    if path == Path::new("-") {
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read standard input")?;
    } else {
        File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?
            .read_to_string(&mut text)
            .await
            .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    }
    Ok(text)
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write records as JSONL to either standard output or a file.
pub async fn write_jsonl<T: Serialize>(path: Option<&Path>, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    for record in records {
        let json = serde_json::to_string(record).context("Failed to serialize record")?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
