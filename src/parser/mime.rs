//! Message ingestion: persist the raw message and transport arguments, then
//! parse the message into a [`MessageNode`] tree whose leaf bodies are saved
//! in the workspace.

use std::io::Read;
use std::path::PathBuf;

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use tracing::{debug, info};

use crate::error::{FilterError, Result};
use crate::model::tree::{is_container_type, MessageNode};
use crate::workspace::Workspace;

/// Maximum nesting depth accepted from a message (to prevent stack overflow on adversarial input).
const MAX_DEPTH: usize = 32;

/// Content type assumed for parts that do not declare one (RFC 2045).
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Everything the rest of the pipeline needs from the input.
#[derive(Debug)]
pub struct IngestedMessage {
    pub tree: MessageNode,
    /// Raw message bytes, identical to the saved `content` file.
    pub raw: Vec<u8>,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

/// Read the whole message from `input`, save it and `args` into the
/// workspace, and parse it.
pub fn ingest(workspace: &Workspace, input: &mut dyn Read, args: &[String]) -> Result<IngestedMessage> {
    let mut raw = Vec::new();
    input
        .read_to_end(&mut raw)
        .map_err(|e| FilterError::workspace("<stdin>", e))?;

    workspace.save_content(&raw)?;
    workspace.save_args(args)?;

    let parsed = parse_message(workspace, &raw)?;
    info!(
        from = parsed.sender.as_deref().unwrap_or("<none>"),
        subject = parsed.subject.as_deref().unwrap_or("<none>"),
        size = raw.len(),
        parts = parsed.tree.leaf_count(),
        "Ingested message"
    );

    Ok(IngestedMessage {
        tree: parsed.tree,
        raw,
        sender: parsed.sender,
        subject: parsed.subject,
    })
}

/// A parsed message before it is paired with its raw bytes.
#[derive(Debug)]
pub struct ParsedMessage {
    pub tree: MessageNode,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

/// Parse `raw` into a tree, saving every leaf body into `workspace`.
pub fn parse_message(workspace: &Workspace, raw: &[u8]) -> Result<ParsedMessage> {
    let message_bytes = skip_from_line(raw);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FilterError::Parse("message is empty".into()));
    }

    let msg = MessageParser::default()
        .parse(message_bytes)
        .ok_or_else(|| FilterError::Parse("not an RFC 5322 message".into()))?;
    if msg.headers().is_empty() {
        return Err(FilterError::Parse("message has no header fields".into()));
    }

    let sender = msg
        .from()
        .and_then(|addr| addr.first())
        .and_then(|addr| addr.address())
        .map(String::from);
    let subject = msg.subject().map(String::from);

    let mut builder = TreeBuilder {
        workspace,
        saved: 0,
    };
    let tree = builder.message(&msg, message_bytes, 0)?;

    Ok(ParsedMessage {
        tree,
        sender,
        subject,
    })
}

/// Walks `mail_parser` output and mirrors it as a [`MessageNode`] tree.
struct TreeBuilder<'w> {
    workspace: &'w Workspace,
    saved: usize,
}

impl TreeBuilder<'_> {
    fn message(&mut self, msg: &Message<'_>, raw: &[u8], depth: usize) -> Result<MessageNode> {
        self.part(msg, 0, raw, depth)
    }

    fn part(&mut self, msg: &Message<'_>, id: usize, raw: &[u8], depth: usize) -> Result<MessageNode> {
        if depth > MAX_DEPTH {
            return Err(FilterError::Parse(format!(
                "message nesting exceeds {MAX_DEPTH} levels"
            )));
        }
        let part = msg
            .parts
            .get(id)
            .ok_or_else(|| FilterError::Parse(format!("dangling MIME part reference {id}")))?;
        let content_type = declared_type(part);
        let filename = part.attachment_name().map(String::from);

        match &part.body {
            PartType::Multipart(children) if is_container_type(&content_type) => {
                let children = children
                    .iter()
                    .map(|&child| self.part(msg, child, raw, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Ok(MessageNode::Container {
                    content_type,
                    children,
                })
            }
            PartType::Multipart(_) => {
                // Unrecognized multipart (e.g. multipart/encrypted): keep the
                // undecoded body as one opaque artifact.
                let body = raw
                    .get(part.raw_body_offset()..part.raw_end_offset())
                    .unwrap_or_default();
                self.leaf(content_type, filename, body)
            }
            PartType::Message(nested) if is_container_type(&content_type) => {
                let child = self.message(nested, part.contents(), depth + 1)?;
                Ok(MessageNode::Container {
                    content_type,
                    children: vec![child],
                })
            }
            _ => self.leaf(content_type, filename, part.contents()),
        }
    }

    fn leaf(&mut self, content_type: String, filename: Option<String>, body: &[u8]) -> Result<MessageNode> {
        self.saved += 1;
        let name = format!(
            "part-{}-{}",
            self.saved,
            filename.as_deref().unwrap_or("body")
        );
        let body: PathBuf = self.workspace.write_file(self.workspace.path(), &name, body)?;
        debug!(content_type = %content_type, path = %body.display(), "Saved MIME leaf");
        Ok(MessageNode::Leaf {
            content_type,
            filename,
            body,
        })
    }
}

/// `type/subtype` of a part, lowercased, defaulting to `text/plain`.
fn declared_type(part: &mail_parser::MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
        .to_ascii_lowercase()
}

/// Skip a byte-order mark and an mbox `From ` line some MTAs prepend.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
