//! One-line summaries of query results
use std::sync::Arc;
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::workers::{CompletionBackend, Row};

pub const NO_DATA_MESSAGE: &str = "조회된 데이터가 없습니다.";
pub const FAILURE_MESSAGE: &str = "분석 중 오류 발생";
pub const EMPTY_REPLY_MESSAGE: &str = "결과 분석 불가";

const SYSTEM_INSTRUCTION: &str = "You are a friendly data analyst. Answer in Korean.";

/// Summarizes a preview of the rows. Never fails the surrounding operation.
pub struct ResultAnalyzer {
    backend: Arc<dyn CompletionBackend>,
    preview_rows: usize,
}

impl ResultAnalyzer {
    pub fn new(backend: Arc<dyn CompletionBackend>, preview_rows: usize) -> Self {
        Self { backend, preview_rows: preview_rows.max(1) }
    }

    /// `None` when no summary can be produced without a credential.
    pub async fn summarize(&self, rows: &[Row], deadline: &Deadline) -> Option<String> {
        if rows.is_empty() {
            return Some(NO_DATA_MESSAGE.to_string());
        }
        if !self.backend.is_configured() {
            debug!("Summary skipped: no language-model credential");
            return None;
        }

        let preview = &rows[..rows.len().min(self.preview_rows)];
        let preview = match serde_json::to_string(preview) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize result preview: {}", e);
                return Some(FAILURE_MESSAGE.to_string());
            }
        };
        let prompt = format!(
            "Analyze this JSON data (SQL result) and provide a very short, friendly business insight in Korean.\n\nData: {}",
            preview
        );

        match deadline.run(self.backend.complete(SYSTEM_INSTRUCTION, &prompt, 0.7)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(Ok(_)) => Some(EMPTY_REPLY_MESSAGE.to_string()),
            Ok(Err(e)) => {
                warn!("Result summary failed: {}", e);
                Some(FAILURE_MESSAGE.to_string())
            }
            Err(interrupted) => {
                warn!("Result summary interrupted: {:?}", interrupted);
                Some(FAILURE_MESSAGE.to_string())
            }
        }
    }
}
