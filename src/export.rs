//! Rendering results as downloadable files.

use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use schemars::JsonSchema;

use crate::{batch::BatchItem, ocr::result::ResultText, prelude::*};

/// Export formats.
#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// `{"ocr_result": ...}`, pretty-printed.
    Json,
    /// Plain text.
    Txt,
    /// Markdown, exactly as returned by the OCR service.
    Md,
}

impl ExportKind {
    /// Every format, in the order we offer them.
    pub const ALL: [ExportKind; 3] = [ExportKind::Json, ExportKind::Txt, ExportKind::Md];

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportKind::Json => "json",
            ExportKind::Txt => "txt",
            ExportKind::Md => "md",
        }
    }

    /// MIME type for downloads.
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportKind::Json => "application/json",
            ExportKind::Txt => "text/plain",
            ExportKind::Md => "text/markdown",
        }
    }
}

/// Names of files written by [`write_exports`].
static EXPORT_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Output_[0-9]+\.(json|txt|md)$").expect("failed to compile regex")
});

/// A file ready to download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportPayload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: &'static str,
}

/// The JSON export document.
#[derive(JsonSchema, Serialize)]
pub struct JsonExport<'a> {
    /// The extracted text.
    pub ocr_result: &'a ResultText,
}

/// Render the result for the item at `index` (0-based) as `kind`.
pub fn format(result: &ResultText, index: usize, kind: ExportKind) -> Result<ExportPayload> {
    let bytes = match kind {
        // `serde_json` indents by two spaces and leaves non-ASCII text alone.
        ExportKind::Json => serde_json::to_vec_pretty(&JsonExport { ocr_result: result })
            .context("failed to serialize OCR result")?,
        ExportKind::Txt | ExportKind::Md => result.as_str().as_bytes().to_vec(),
    };
    Ok(ExportPayload {
        bytes,
        filename: format!("Output_{}.{}", index + 1, kind.extension()),
        mime_type: kind.mime_type(),
    })
}

/// Remove exports left in `dir` by an earlier run. Other files are left
/// alone. Returns the number of files removed.
async fn remove_stale_exports(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {:?}", dir))?;
    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to list {:?}", dir))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !EXPORT_FILENAME_RE.is_match(name) {
            continue;
        }
        let path = entry.path();
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove old export {:?}", path))?;
        removed += 1;
    }
    Ok(removed)
}

/// Write every requested format for every item into `dir`, replacing any
/// exports from a previous run. Returns the paths written, grouped by item.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
pub async fn write_exports(
    dir: &Path,
    items: &[BatchItem],
    kinds: &[ExportKind],
) -> Result<Vec<Vec<PathBuf>>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create output directory {:?}", dir))?;
    let removed = remove_stale_exports(dir).await?;
    if removed > 0 {
        debug!(removed, "Removed exports from previous run");
    }
    let mut written = Vec::with_capacity(items.len());
    for item in items {
        let mut paths = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let payload = format(&item.result, item.index, kind)?;
            let path = dir.join(&payload.filename);
            tokio::fs::write(&path, &payload.bytes)
                .await
                .with_context(|| format!("failed to write {:?}", path))?;
            debug!(path = %path.display(), mime_type = payload.mime_type, "Wrote export");
            paths.push(path);
        }
        written.push(paths);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> ResultText {
        ResultText::from_extracted(text.to_owned())
    }

    #[test]
    fn test_json_export_round_trips() {
        let text = result("# Überschrift\n\nCafé «crème» 東京");
        let payload = format(&text, 0, ExportKind::Json).unwrap();
        assert_eq!(payload.filename, "Output_1.json");
        assert_eq!(payload.mime_type, "application/json");

        let json = String::from_utf8(payload.bytes).unwrap();
        assert!(json.contains("Café «crème» 東京"));
        assert!(json.starts_with("{\n  \"ocr_result\": "));
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, serde_json::json!({ "ocr_result": text.as_str() }));
    }

    #[test]
    fn test_text_exports_are_raw() {
        let text = result("line 1\nline 2");
        let txt = format(&text, 4, ExportKind::Txt).unwrap();
        assert_eq!(txt.bytes, b"line 1\nline 2");
        assert_eq!(txt.filename, "Output_5.txt");
        assert_eq!(txt.mime_type, "text/plain");

        let md = format(&text, 4, ExportKind::Md).unwrap();
        assert_eq!(md.bytes, txt.bytes);
        assert_eq!(md.filename, "Output_5.md");
        assert_eq!(md.mime_type, "text/markdown");
    }

    #[tokio::test]
    async fn test_write_exports() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let items = ["first", "second"]
            .iter()
            .enumerate()
            .map(|(index, text)| BatchItem {
                index,
                source: format!("https://a.test/{index}"),
                request: None,
                preview: None,
                result: result(text),
                failure: None,
            })
            .collect::<Vec<_>>();
        let written = write_exports(&out, &items, &ExportKind::ALL).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1][2], out.join("Output_2.md"));
        assert_eq!(
            std::fs::read_to_string(out.join("Output_2.txt")).unwrap(),
            "second"
        );
        let json = std::fs::read_to_string(out.join("Output_1.json")).unwrap();
        assert_eq!(json, "{\n  \"ocr_result\": \"first\"\n}");
    }

    fn items(texts: &[&str]) -> Vec<BatchItem> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| BatchItem {
                index,
                source: format!("https://a.test/{index}"),
                request: None,
                preview: None,
                result: result(text),
                failure: None,
            })
            .collect()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_exports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        write_exports(dir.path(), &items(&["a", "b", "c"]), &ExportKind::ALL)
            .await
            .unwrap();
        assert_eq!(file_names(dir.path()).len(), 10);

        write_exports(dir.path(), &items(&["fresh"]), &[ExportKind::Txt])
            .await
            .unwrap();
        assert_eq!(file_names(dir.path()), vec!["Output_1.txt", "notes.txt"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Output_1.txt")).unwrap(),
            "fresh"
        );
    }
}
