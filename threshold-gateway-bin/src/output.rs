//! Writes batches of triggers out as JSON Lines, one trigger per line.

use std::io;
use threshold_gateway::Trigger;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::UnboundedReceiver,
};
use tracing::debug;

/// Render a batch as JSON Lines.
fn render_batch(batch: &[Trigger]) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for trigger in batch {
        serde_json::to_writer(&mut buf, trigger)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Write every batch received on `rx` to `out`, flushing after each batch.
///
/// Returns the number of triggers written once `rx` is closed.
pub async fn write_batches<W>(
    mut rx: UnboundedReceiver<Vec<Trigger>>,
    mut out: W,
) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(batch) = rx.recv().await {
        let Some(first) = batch.first() else {
            continue;
        };
        debug!(
            "Writing batch of {} triggers for {}",
            batch.len(),
            first.threshold_name
        );
        let bytes = render_batch(&batch)?;
        out.write_all(&bytes).await?;
        out.flush().await?;
        written += batch.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tokio::sync::mpsc::unbounded_channel;

    fn trigger(name: &str, count: u64) -> Trigger {
        Trigger {
            threshold_name: name.into(),
            event_count: count,
            window_seconds: 60,
            suppression_seconds: 30,
            triggered_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            event_type: 7,
            message: "db timeout".into(),
        }
    }

    #[tokio::test]
    async fn test_write_batches_as_json_lines() {
        let (tx, rx) = unbounded_channel();
        tx.send(vec![trigger("timeouts", 5), trigger("timeouts", 6)])
            .unwrap();
        tx.send(Vec::new()).unwrap();
        tx.send(vec![trigger("disk", 1)]).unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = write_batches(rx, &mut out).await.unwrap();
        assert_eq!(written, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["threshold_name"], "timeouts");
        assert_eq!(lines[1]["event_count"], 6);
        assert_eq!(lines[2]["threshold_name"], "disk");
        assert_eq!(lines[2]["window_seconds"], 60);
        assert_eq!(lines[2]["triggered_at"], "2023-11-14T22:13:20Z");
    }
}
