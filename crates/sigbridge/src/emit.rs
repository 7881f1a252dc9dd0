//! `sigbridge emit`: hand-written datagrams for poking at a transport.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UdpSocket;

/// Parse `input` as a JSON object and return its compact form.
pub(crate) fn validate_body(input: &str) -> Result<String> {
    let value: Value = serde_json::from_str(input).context("Invalid JSON")?;
    if !value.is_object() {
        bail!("Invalid JSON: expected an object");
    }
    Ok(value.to_string())
}

async fn send_datagram(host: &str, port: u16, body: &str) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .context("Failed to bind UDP socket")?;
    socket.set_broadcast(true)?;
    let _ = socket
        .send_to(body.as_bytes(), (host, port))
        .await
        .with_context(|| format!("Failed to send to {host}:{port}"))?;
    Ok(())
}

/// Validate `body` and send it once.
pub(crate) async fn send_once(host: &str, port: u16, body: &str) -> Result<()> {
    let body = validate_body(body)?;
    send_datagram(host, port, &body).await?;
    println!("Sent: {body}");
    Ok(())
}

/// Read JSON lines from stdin and send each valid one. Ends on `exit` or
/// end of input.
pub(crate) async fn interactive(host: &str, port: u16) -> Result<()> {
    println!("Sending to {host}:{port}. Type JSON to send, 'exit' to quit.");
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }

        match validate_body(line) {
            Ok(body) => match send_datagram(host, port, &body).await {
                Ok(()) => println!("Sent: {body}"),
                Err(e) => eprintln!("{e:#}"),
            },
            Err(e) => eprintln!("{e:#}"),
        }
    }
    println!("Exiting...");
    Ok(())
}
