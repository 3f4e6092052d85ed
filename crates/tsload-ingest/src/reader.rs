//! CSV row source.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tsload_common::types::Row;
use tsload_common::TsloadError;

/// Stream a headered CSV file into a bounded queue.
///
/// Parsing runs on a blocking task so a slow consumer backpressures the reader. The
/// handle resolves to the number of rows sent; it stops early without error when the
/// receiver is dropped.
pub fn spawn_csv_reader(
    path: impl Into<PathBuf>,
    capacity: usize,
) -> (mpsc::Receiver<Row>, JoinHandle<Result<u64, TsloadError>>) {
    let path = path.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || -> Result<u64, TsloadError> {
        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();
        let mut sent = 0u64;

        for record in reader.records() {
            let record = record?;
            let row = Row::from_text(headers.iter().zip(record.iter()));
            if tx.blocking_send(row).is_err() {
                warn!(path = %path.display(), sent, "Row queue closed, stopping reader");
                break;
            }
            sent += 1;
        }

        info!(path = %path.display(), rows = sent, "Finished reading file");
        Ok(sent)
    });

    (rx, handle)
}

/// Read a whole headered CSV file into memory
pub fn read_csv_rows(path: &Path) -> Result<Vec<Row>, TsloadError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let rows = reader
        .records()
        .map(|record| Ok(Row::from_text(headers.iter().zip(record?.iter()))))
        .collect::<Result<Vec<_>, TsloadError>>()?;

    debug!(path = %path.display(), rows = rows.len(), "Loaded rows");
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tsload_common::types::Value;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_streams_rows_with_headers() {
        let file = write_csv("time,current\n2022-11-23 09:46:25,1.5\n2022-11-23 09:46:26,2.5\n");
        let (mut rx, handle) = spawn_csv_reader(file.path(), 1);

        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }

        assert_eq!(handle.await.unwrap().unwrap(), 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("current"), Some(&Value::from("2.5")));
        assert_eq!(rows[0].get("time"), Some(&Value::from("2022-11-23 09:46:25")));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (mut rx, handle) = spawn_csv_reader("/nonexistent/data.csv", 4);
        assert!(rx.recv().await.is_none());
        assert!(matches!(handle.await.unwrap(), Err(TsloadError::Csv(_))));
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_reader() {
        let file = write_csv("v\n1\n2\n3\n4\n");
        let (rx, handle) = spawn_csv_reader(file.path(), 1);
        drop(rx);
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }

    #[test]
    fn test_read_csv_rows() {
        let file = write_csv("code,name\n100,aaa\n101,bbb\n");
        let rows = read_csv_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&Value::from("aaa")));

        let ragged = write_csv("code,name\n100\n");
        assert!(read_csv_rows(ragged.path()).is_err());
    }
}
