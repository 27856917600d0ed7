use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::is_canonical_uuid;
use crate::entities::FileStore;
use crate::error::Result;

static UUID_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandValidation {
    pub is_valid: bool,
    /// Referenced ids in order of appearance, lowercased. Duplicates kept.
    pub file_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandValidation {
    fn invalid(file_ids: Vec<String>, error: String) -> Self {
        Self {
            is_valid: false,
            file_ids,
            error: Some(error),
        }
    }
}

/// Every canonical UUID embedded in `command`, lowercased.
pub fn extract_file_ids(command: &str) -> Vec<String> {
    UUID_LIKE
        .find_iter(command)
        .map(|m| m.as_str())
        .filter(|s| is_canonical_uuid(s))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Check that `command` references at least one file and that every
/// referenced file exists.
pub async fn validate<S: FileStore>(store: &S, command: &str) -> Result<CommandValidation> {
    let file_ids = extract_file_ids(command);
    if file_ids.is_empty() {
        return Ok(CommandValidation::invalid(
            file_ids,
            "no valid file ids found in command".to_owned(),
        ));
    }

    let existing = store.existing_file_ids(&file_ids).await?;
    let mut missing: Vec<&str> = Vec::new();
    for id in &file_ids {
        if !existing.contains(id) && !missing.contains(&id.as_str()) {
            missing.push(id);
        }
    }

    if !missing.is_empty() {
        let error = format!("files not found: {}", missing.join(", "));
        return Ok(CommandValidation::invalid(file_ids, error));
    }

    Ok(CommandValidation {
        is_valid: true,
        file_ids,
        error: None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::test_support::{insert_file, memory_store};

    const A: &str = "3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b";
    const B: &str = "01890a5d-ac96-774b-bcce-b302099a8057";

    #[test]
    fn extracts_in_order_and_lowercases() {
        let cmd = format!("ffmpeg -i {} -i {A} -filter_complex x out.mp4", B.to_uppercase());
        assert_eq!(extract_file_ids(&cmd), vec![B.to_owned(), A.to_owned()]);
    }

    #[test]
    fn skips_non_canonical_uuids() {
        // version nibble 0
        let cmd = "ffmpeg -i 3f2b8a4e-9c1d-0e2f-8a7b-1c2d3e4f5a6b out.mp4";
        assert!(extract_file_ids(cmd).is_empty());
    }

    #[test]
    fn keeps_duplicates() {
        let cmd = format!("ffmpeg -i {A} -i {A} out.mp4");
        assert_eq!(extract_file_ids(&cmd).len(), 2);
    }

    #[tokio::test]
    async fn command_without_ids_is_invalid() {
        let store = memory_store().await;
        let v = validate(&store, "ffmpeg -version").await.unwrap();
        assert!(!v.is_valid);
        assert_eq!(v.error.as_deref(), Some("no valid file ids found in command"));
    }

    #[tokio::test]
    async fn missing_files_are_listed() {
        let store = memory_store().await;
        insert_file(&store, A).await;

        let v = validate(&store, &format!("ffmpeg -i {A} -i {B} out.mp4"))
            .await
            .unwrap();
        assert!(!v.is_valid);
        assert_eq!(v.error, Some(format!("files not found: {B}")));
        assert_eq!(v.file_ids, vec![A.to_owned(), B.to_owned()]);
    }

    #[tokio::test]
    async fn existing_files_validate() {
        let store = memory_store().await;
        insert_file(&store, A).await;

        let v = validate(&store, &format!("ffmpeg -i {A} out.mp4")).await.unwrap();
        assert!(v.is_valid);
        assert!(v.error.is_none());
    }
}
