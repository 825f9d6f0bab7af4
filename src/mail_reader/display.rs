use std::io::Write;

use log::error;
use tokio::sync::mpsc;

use crate::mail_reader::fetch::FetchResponse;

/// Drains the fetch stream, writing every response as pretty JSON.
///
/// Returns how many responses carried a message and how many an error.
pub async fn print_responses<W: Write>(
    mut responses: mpsc::Receiver<FetchResponse>,
    out: &mut W,
) -> std::io::Result<(usize, usize)> {
    let (mut messages, mut errors) = (0, 0);
    while let Some(response) = responses.recv().await {
        messages += usize::from(response.message.is_some());
        errors += usize::from(response.error.is_some());

        match serde_json::to_string_pretty(&response) {
            Ok(json) => writeln!(out, "{json}")?,
            Err(e) => error!("Error converting to JSON: {}", e),
        }
    }
    Ok((messages, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail_reader::error::MessageError;
    use crate::mail_reader::message::Message;

    #[tokio::test]
    async fn test_print_responses() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(FetchResponse {
            message: Some(Message {
                subject: "first".into(),
                uid: 1,
                ..Default::default()
            }),
            error: None,
        })
        .await
        .unwrap();
        tx.send(FetchResponse {
            message: None,
            error: Some(MessageError::InvalidTo("bad".into())),
        })
        .await
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let counts = print_responses(rx, &mut out).await.unwrap();
        assert_eq!(counts, (1, 1));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"subject\": \"first\""));
        assert!(text.contains("\"error\": \"parsing To: bad\""));
    }
}
