//! MIME extraction. Reduces a raw message to subject, sender, one body and
//! a flat attachment list.

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, error};

use crate::error::ExtractError;
use crate::mail::types::{Attachment, BodyFormat, EmailMessage};

/// Subject used when the message has none.
pub const NO_SUBJECT: &str = "[no subject]";

/// Sender used when the message has no `From` header.
pub const NO_SENDER: &str = "[no sender]";

/// Body substituted when no readable part can be found.
pub const PLACEHOLDER_BODY: &str = "";

/// Child types searched inside a multipart container, most preferred first.
const BODY_PRIORITY: [(&str, &str); 4] = [
    ("multipart", "alternative"),
    ("multipart", "related"),
    ("text", "html"),
    ("text", "plain"),
];

/// Parse raw message bytes into an [`EmailMessage`].
///
/// Never fails: unparseable input and bodiless messages are logged and
/// replaced with placeholders so the transaction can still proceed.
pub fn extract(raw: &[u8]) -> EmailMessage {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        error!(
            error = %ExtractError::Malformed,
            bytes = raw.len(),
            "Substituting placeholder message"
        );
        return EmailMessage::new(
            NO_SUBJECT,
            NO_SENDER,
            PLACEHOLDER_BODY,
            BodyFormat::Text,
            Vec::new(),
        );
    };

    let (body, body_format) = match resolve_body(&parsed) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "Substituting placeholder body");
            (PLACEHOLDER_BODY.to_string(), BodyFormat::Text)
        }
    };

    let attachments: Vec<Attachment> = parsed
        .attachments()
        .filter(|part| !matches!(part.body, PartType::Multipart(_)))
        .map(|part| Attachment {
            data: part.contents().to_vec(),
            filename: part.attachment_name().unwrap_or_default().to_string(),
        })
        .collect();

    let subject = parsed.subject().unwrap_or(NO_SUBJECT).to_string();
    let from = render_sender(&parsed);

    debug!(
        subject = %subject,
        format = %body_format,
        attachments = attachments.len(),
        "Extracted email"
    );

    EmailMessage::new(subject, from, body, body_format, attachments)
}

/// Pick the single part that serves as the notification body.
///
/// A non-multipart text root is used unless it is marked as an
/// attachment. Inside a multipart container the immediate children are
/// searched in [`BODY_PRIORITY`] order, descending into nested containers.
pub fn resolve_body(message: &Message<'_>) -> Result<(String, BodyFormat), ExtractError> {
    let part = find_body_part(message, message.root_part()).ok_or(ExtractError::UnresolvableBody)?;
    let text = match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.as_ref(),
        _ => return Err(ExtractError::UnresolvableBody),
    };
    Ok((text.trim().to_string(), format_of(part)))
}

fn find_body_part<'a, 'x>(
    message: &'a Message<'x>,
    part: &'a MessagePart<'x>,
) -> Option<&'a MessagePart<'x>> {
    match &part.body {
        PartType::Multipart(children) => {
            for (ctype, subtype) in BODY_PRIORITY {
                let candidate = children
                    .iter()
                    .filter_map(|id| message.parts.get(*id as usize))
                    .find(|child| !is_attachment(child) && has_type(child, ctype, subtype));
                if let Some(found) = candidate.and_then(|child| find_body_part(message, child)) {
                    return Some(found);
                }
            }
            None
        }
        PartType::Text(_) | PartType::Html(_)
            if !is_attachment(part)
                && (has_type(part, "text", "plain") || has_type(part, "text", "html")) =>
        {
            Some(part)
        }
        _ => None,
    }
}

/// Content-type check. A part without a `Content-Type` is `text/plain`.
fn has_type(part: &MessagePart<'_>, ctype: &str, subtype: &str) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case(ctype)
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case(subtype))
        }
        None => ctype == "text" && subtype == "plain",
    }
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

fn format_of(part: &MessagePart<'_>) -> BodyFormat {
    if matches!(part.body, PartType::Html(_)) || has_type(part, "text", "html") {
        BodyFormat::Html
    } else {
        BodyFormat::Text
    }
}

/// Render the `From` header as `Name <address>` or just the address.
fn render_sender(parsed: &Message<'_>) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return NO_SENDER.to_string();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => NO_SENDER.to_string(),
    }
}
