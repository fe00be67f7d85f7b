//! Job source reading one JSON request per line.

use carpenter_core::{JobRequest, Result};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{error, warn};

/// Stream of requests read from `reader`.
///
/// Blank lines are ignored and lines that are not JSON objects are logged
/// and skipped. Any object is forwarded, with wrong-typed fields left unset
/// so that validation reports them. The stream ends at end of input or on
/// the first read error.
pub fn json_lines<R>(reader: R) -> BoxStream<'static, JobRequest>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    LinesStream::new(BufReader::new(reader).lines())
        .take_while(|line| {
            if let Err(e) = line {
                error!(error = %e, "Failed to read job source");
            }
            future::ready(line.is_ok())
        })
        .filter_map(|line| future::ready(line.ok().and_then(|line| parse_line(&line))))
        .boxed()
}

/// Open `path` as a job source, or stdin when `None` or `-`.
pub async fn open_source(path: Option<&Path>) -> Result<BoxStream<'static, JobRequest>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = tokio::fs::File::open(path).await?;
            Ok(json_lines(file))
        }
        _ => Ok(json_lines(tokio::io::stdin())),
    }
}

fn parse_line(line: &str) -> Option<JobRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(Value::Object(fields)) => Some(lenient_request(&fields)),
        Ok(_) => {
            warn!(line, "Skipping job that is not an object");
            None
        }
        Err(e) => {
            warn!(error = %e, line, "Skipping malformed job");
            None
        }
    }
}

fn lenient_request(fields: &Map<String, Value>) -> JobRequest {
    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    JobRequest {
        name: text("name"),
        version: text("version"),
        env: text("env"),
        locale: text("locale"),
        build_type: text("type"),
        promote: fields.get("promote").and_then(Value::as_bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_requests_and_skips_garbage() {
        let input = br#"{"name": "test", "version": "1.0.0", "env": "dev"}

not json
{"name": "other", "version": "2.0.0", "env": "prod", "locale": "de-DE", "type": "es6", "promote": false}
"#;
        let jobs: Vec<JobRequest> = json_lines(&input[..]).collect().await;

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0], JobRequest::new("test", "1.0.0", "dev"));
        assert_eq!(jobs[1].locale.as_deref(), Some("de-DE"));
        assert_eq!(jobs[1].build_type.as_deref(), Some("es6"));
        assert_eq!(jobs[1].promote, Some(false));
    }

    #[tokio::test]
    async fn test_incomplete_request_is_still_forwarded() {
        let jobs: Vec<JobRequest> = json_lines(&br#"{"name": "test"}"#[..]).collect().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].version.is_none());
    }

    #[tokio::test]
    async fn test_wrong_typed_fields_fail_validation() {
        let input = br#"{"name": "a", "version": 1.0, "env": "dev"}
{"name": "b", "version": "1.0.0", "env": 5}
{"name": "c", "version": "1.0.0", "env": "dev", "type": 3, "promote": "yes"}
["not", "an", "object"]
"#;
        let jobs: Vec<JobRequest> = json_lines(&input[..]).collect().await;

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].name.as_deref(), Some("a"));
        assert!(jobs[0].version.is_none());
        assert_eq!(
            jobs[0].validate().unwrap_err().to_string(),
            "Invalid version specified"
        );
        assert!(jobs[1].env.is_none());
        assert_eq!(jobs[1].validate().unwrap_err().to_string(), "env not specified");
        assert!(jobs[2].build_type.is_none());
        assert!(jobs[2].promote.is_none());
        assert!(jobs[2].validate().is_ok());
    }

    #[tokio::test]
    async fn test_open_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.jsonl");
        std::fs::write(&path, "{\"name\": \"a\", \"version\": \"1.0.0\", \"env\": \"dev\"}\n").unwrap();

        let jobs: Vec<JobRequest> = open_source(Some(&path)).await.unwrap().collect().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(open_source(Some(&dir.path().join("absent"))).await.is_err());
    }
}
