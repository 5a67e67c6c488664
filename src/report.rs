use std::borrow::Cow;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::classifier::{ClassificationResult, Label};
use crate::errors::{Result, TriageError};

/// Field separator of the results file.
pub const DELIMITER: char = '-';
const QUOTE: char = '"';

/// One line of the results history.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub patient_id: String,
    pub label: Label,
    pub confidence: f32,
}

impl ResultRecord {
    pub fn new(patient_id: impl Into<String>, result: &ClassificationResult) -> Self {
        Self {
            patient_id: patient_id.into(),
            label: result.label,
            confidence: result.confidence,
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            quote_field(&self.patient_id),
            quote_field(self.label.as_str()),
            quote_field(&format!("{:.2}%", self.confidence))
        )
    }
}

/// Quotes a field only when it holds the delimiter, a quote or a line
/// break; inner quotes are doubled.
fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains(|c: char| matches!(c, DELIMITER | QUOTE | '\n' | '\r')) {
        let escaped = field.replace(QUOTE, "\"\"");
        Cow::Owned(format!("{QUOTE}{escaped}{QUOTE}"))
    } else {
        Cow::Borrowed(field)
    }
}

/// Output path of the Grad-CAM overlay for `input`.
///
/// The input's directory relative to `input_root` is mirrored under
/// `output_dir` and the source extension kept in the name, so
/// `a/chest.png` and `b/chest.dcm` never share an overlay.
pub fn overlay_path(input_root: &Path, input: &Path, output_dir: &Path) -> PathBuf {
    let directory = input
        .strip_prefix(input_root)
        .ok()
        .and_then(Path::parent)
        .map_or_else(|| output_dir.to_path_buf(), |relative| output_dir.join(relative));
    let stem = input
        .file_stem()
        .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match input.extension() {
        Some(extension) => format!("{stem}_{}_gradcam.png", extension.to_string_lossy()),
        None => format!("{stem}_gradcam.png"),
    };
    directory.join(name)
}

/// Appends `record` as a line to `csv_path`, creating missing directories.
pub fn append_record(csv_path: &Path, record: &ResultRecord) -> Result<()> {
    if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TriageError::FileSystem {
            path: parent.to_path_buf(),
            operation: "results directory creation".to_string(),
            source: e,
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)
        .map_err(|e| TriageError::FileSystem {
            path: csv_path.to_path_buf(),
            operation: "results file open".to_string(),
            source: e,
        })?;
    writeln!(file, "{record}").map_err(|e| TriageError::FileSystem {
        path: csv_path.to_path_buf(),
        operation: "results append".to_string(),
        source: e,
    })?;

    info!(path = %csv_path.display(), patient_id = %record.patient_id, "result saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(patient_id: &str, label: Label, confidence: f32) -> ResultRecord {
        ResultRecord {
            patient_id: patient_id.to_string(),
            label,
            confidence,
        }
    }

    #[test]
    fn test_record_format() {
        assert_eq!(
            record("1234", Label::Bacterial, 91.456).to_string(),
            "1234-bacterial-91.46%"
        );
    }

    #[test]
    fn test_fields_with_delimiter_are_quoted() {
        assert_eq!(
            record("CC-1020-30", Label::Normal, 70.0).to_string(),
            "\"CC-1020-30\"-normal-70.00%"
        );
        assert_eq!(
            record("say \"hi\"", Label::Viral, 12.5).to_string(),
            "\"say \"\"hi\"\"\"-viral-12.50%"
        );
        assert_eq!(
            record("line\nbreak", Label::Viral, 1.0).to_string(),
            "\"line\nbreak\"-viral-1.00%"
        );
    }

    #[test]
    fn test_quoted_record_keeps_three_fields() {
        let line = record("CC-1020-30", Label::Bacterial, 91.0).to_string();
        let (quoted, rest) = line[1..].split_once("\"-").expect("closing quote");
        assert_eq!(quoted, "CC-1020-30");
        assert_eq!(rest.split(DELIMITER).collect::<Vec<_>>(), ["bacterial", "91.00%"]);
    }

    #[test]
    fn test_overlay_path_mirrors_input_tree() {
        let root = Path::new("scans");
        let output = Path::new("output");
        let png = overlay_path(root, Path::new("scans/a/chest.png"), output);
        let dcm = overlay_path(root, Path::new("scans/b/chest.dcm"), output);
        let sibling = overlay_path(root, Path::new("scans/a/chest.dcm"), output);

        assert_eq!(png, Path::new("output/a/chest_png_gradcam.png"));
        assert_eq!(dcm, Path::new("output/b/chest_dcm_gradcam.png"));
        assert_eq!(sibling, Path::new("output/a/chest_dcm_gradcam.png"));
    }

    #[test]
    fn test_overlay_path_for_single_file() {
        let input = Path::new("incoming/1234.jpg");
        assert_eq!(
            overlay_path(input, input, Path::new("output")),
            Path::new("output/1234_jpg_gradcam.png")
        );
        assert_eq!(
            overlay_path(Path::new("elsewhere"), Path::new("x/noext"), Path::new("out")),
            Path::new("out/noext_gradcam.png")
        );
    }

    #[test]
    fn test_append_creates_directories_and_appends() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let csv_path = temp_dir.path().join("results").join("history.csv");

        append_record(&csv_path, &record("1", Label::Normal, 70.0))?;
        append_record(&csv_path, &record("2", Label::Viral, 55.5))?;

        let contents = fs::read_to_string(&csv_path)?;
        assert_eq!(contents, "1-normal-70.00%\n2-viral-55.50%\n");
        Ok(())
    }
}
