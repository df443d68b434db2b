//! Tokio accept loop and per-connection I/O for the SMTP front end.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::SmtpError;
use crate::smtp::session::{Action, Reply, Session, SmtpContext};

/// Longest accepted command line, terminator included.
pub const MAX_COMMAND_LINE: usize = 1000;

/// Message data is read in pieces no larger than this, so one endless
/// line cannot grow a buffer without bound.
const DATA_CHUNK: u64 = 64 * 1024;

/// Accept connections until the listener fails, one task per session.
pub async fn serve(listener: TcpListener, ctx: Arc<SmtpContext>) -> Result<(), SmtpError> {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, hostname = %ctx.hostname, "SMTP server listening");
    }
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        let span = info_span!("smtp_session", session = %Uuid::new_v4(), peer = %peer);
        tokio::spawn(
            async move {
                debug!("Connection opened");
                match handle_connection(stream, ctx).await {
                    Ok(()) => debug!("Connection closed"),
                    Err(e) => warn!(error = %e, "Session ended with error"),
                }
            }
            .instrument(span),
        );
    }
}

enum Line {
    Complete(Vec<u8>),
    TooLong,
    Eof,
}

/// Run one SMTP session over any byte stream.
pub async fn handle_connection<S>(stream: S, ctx: Arc<SmtpContext>) -> Result<(), SmtpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut session = Session::new(ctx);

    write_reply(&mut writer, &session.greeting()).await?;
    loop {
        let line = match read_command(&mut reader).await? {
            Line::Complete(line) => line,
            Line::TooLong => {
                write_reply(&mut writer, &Reply::new(500, "5.5.2 Line too long")).await?;
                continue;
            }
            Line::Eof => return Ok(()),
        };
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']);

        match session.handle_line(line) {
            Action::Reply(reply) => write_reply(&mut writer, &reply).await?,
            Action::Close(reply) => {
                write_reply(&mut writer, &reply).await?;
                return Ok(());
            }
            Action::ReadData(reply) => {
                write_reply(&mut writer, &reply).await?;
                let reply = match read_data(&mut reader, session.max_message_size()).await? {
                    Some(data) => session.receive_data(&data).await,
                    None => session.reject_oversized(),
                };
                write_reply(&mut writer, &reply).await?;
            }
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<(), SmtpError> {
    writer.write_all(reply.render().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Line, SmtpError> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_COMMAND_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if buf.ends_with(b"\n") {
        return Ok(Line::Complete(buf));
    }
    if n < MAX_COMMAND_LINE {
        // Peer went away mid-line.
        return Ok(Line::Eof);
    }

    // Discard the remainder of the oversized line.
    loop {
        let mut rest = Vec::new();
        let n = (&mut *reader).take(DATA_CHUNK).read_until(b'\n', &mut rest).await?;
        if n == 0 {
            return Ok(Line::Eof);
        }
        if rest.ends_with(b"\n") {
            return Ok(Line::TooLong);
        }
    }
}

/// Read message data up to the terminating `.` line, undoing dot-stuffing.
///
/// Returns `None` if the message exceeded `max_size`; the data is still
/// consumed so the session can continue.
async fn read_data<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>, SmtpError> {
    let mut data = Vec::new();
    let mut oversized = false;
    let mut at_line_start = true;
    loop {
        let mut chunk = Vec::new();
        let n = (&mut *reader).take(DATA_CHUNK).read_until(b'\n', &mut chunk).await?;
        if n == 0 {
            error!("Connection closed during DATA");
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        if at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
            break;
        }
        let content = if at_line_start && chunk.starts_with(b".") {
            &chunk[1..]
        } else {
            &chunk[..]
        };
        if !oversized {
            if data.len() + content.len() > max_size {
                oversized = true;
                data = Vec::new();
            } else {
                data.extend_from_slice(content);
            }
        }
        at_line_start = chunk.ends_with(b"\n");
    }
    Ok((!oversized).then_some(data))
}
