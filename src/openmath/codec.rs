//! Incremental XML parse producing an [`OmNode`] tree, and the symmetric
//! encoder for emitting responses (spec §4.2).
//!
//! [`Parser::feed`] may be called any number of times as bytes arrive off
//! the wire; only [`Parser::close`] performs the actual XML parse, so no
//! single call needs the whole transaction body in one buffer.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::events::Event;

use super::{OmNode, OmPayload, OmTag};
use crate::errors::ScscpError;

/// Incremental OpenMath XML parser.
///
/// Accumulates fed bytes until [`close`](Self::close) performs the parse.
#[derive(Debug, Default)]
pub struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self { Self { buffer: Vec::new() } }

    /// Append bytes to the accumulated transaction body.
    pub fn feed(&mut self, bytes: &[u8]) { self.buffer.extend_from_slice(bytes); }

    /// Parse the accumulated bytes into an OpenMath tree.
    ///
    /// # Errors
    ///
    /// Returns [`ScscpError::MalformedOpenMath`] if the buffer is not
    /// well-formed XML, uses an element outside the closed tag set, or
    /// leaves elements unclosed.
    pub fn close(self) -> Result<OmNode, ScscpError> { parse_document(&self.buffer) }
}

/// Convenience wrapper for a single fully-buffered parse.
///
/// # Errors
///
/// As [`Parser::close`].
pub fn decode_transaction(bytes: &[u8]) -> Result<OmNode, ScscpError> { parse_document(bytes) }

struct Frame {
    tag: OmTag,
    attrs: HashMap<String, String>,
    children: Vec<OmNode>,
    text: String,
}

fn parse_document(bytes: &[u8]) -> Result<OmNode, ScscpError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<OmNode> = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let tag = element_tag(&e.name().as_ref().to_vec())?;
                let attrs = collect_attrs(&e)?;
                stack.push(Frame {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                let tag = element_tag(&e.name().as_ref().to_vec())?;
                let attrs = collect_attrs(&e)?;
                let node = finalize(tag, &attrs, Vec::new(), String::new())?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let Some(frame) = stack.pop() else {
                    return Err(ScscpError::MalformedOpenMath(
                        "unmatched closing tag".to_owned(),
                    ));
                };
                let node = finalize(frame.tag, &frame.attrs, frame.children, frame.text)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ScscpError::MalformedOpenMath(
            "unclosed element at end of document".to_owned(),
        ));
    }
    root.ok_or_else(|| ScscpError::MalformedOpenMath("empty document".to_owned()))
}

fn attach(stack: &mut [Frame], root: &mut Option<OmNode>, node: OmNode) -> Result<(), ScscpError> {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    } else if root.is_some() {
        return Err(ScscpError::MalformedOpenMath(
            "multiple root elements".to_owned(),
        ));
    } else {
        *root = Some(node);
    }
    Ok(())
}

fn element_tag(name: &[u8]) -> Result<OmTag, ScscpError> {
    let name = std::str::from_utf8(name)
        .map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?;
    OmTag::from_element_name(name)
        .ok_or_else(|| ScscpError::MalformedOpenMath(format!("unrecognised element {name}")))
}

fn collect_attrs(e: &quick_xml::events::BytesStart<'_>) -> Result<HashMap<String, String>, ScscpError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?
            .to_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ScscpError::MalformedOpenMath(e.to_string()))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn finalize(
    tag: OmTag,
    attrs: &HashMap<String, String>,
    children: Vec<OmNode>,
    text: String,
) -> Result<OmNode, ScscpError> {
    let payload = match tag {
        OmTag::Obj | OmTag::A | OmTag::Attr | OmTag::Atp | OmTag::Bind | OmTag::Err => None,
        OmTag::I => {
            let value = text.trim().parse::<i64>().map_err(|e| {
                ScscpError::MalformedOpenMath(format!("invalid OMI payload {text:?}: {e}"))
            })?;
            Some(OmPayload::Int(value))
        }
        OmTag::F => {
            let dec = attrs
                .get("dec")
                .ok_or_else(|| ScscpError::MalformedOpenMath("OMF missing dec".to_owned()))?;
            Some(OmPayload::Float(parse_float_dec(dec)?))
        }
        OmTag::Str => Some(OmPayload::Str(text)),
        OmTag::B => {
            let decoded = BASE64
                .decode(text.trim())
                .map_err(|e| ScscpError::MalformedOpenMath(format!("invalid OMB payload: {e}")))?;
            Some(OmPayload::Bytes(decoded))
        }
        OmTag::V => {
            let name = attrs
                .get("name")
                .ok_or_else(|| ScscpError::MalformedOpenMath("OMV missing name".to_owned()))?;
            Some(OmPayload::Var(name.clone()))
        }
        OmTag::S => {
            let cd = attrs
                .get("cd")
                .ok_or_else(|| ScscpError::MalformedOpenMath("OMS missing cd".to_owned()))?;
            let name = attrs
                .get("name")
                .ok_or_else(|| ScscpError::MalformedOpenMath("OMS missing name".to_owned()))?;
            Some(OmPayload::Symbol {
                cd: cd.clone(),
                name: name.clone(),
                cdbase: attrs.get("cdbase").cloned(),
            })
        }
        OmTag::Foreign => Some(OmPayload::Foreign {
            encoding: attrs.get("encoding").cloned(),
            data: text,
        }),
    };
    Ok(OmNode {
        tag,
        payload,
        children,
    })
}

/// Parse the `dec` attribute value `OMF` uses for its float payload.
fn parse_float_dec(dec: &str) -> Result<f64, ScscpError> {
    match dec {
        "NaN" => Ok(f64::NAN),
        "INF" | "+INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|e| ScscpError::MalformedOpenMath(format!("invalid OMF dec {other:?}: {e}"))),
    }
}

/// Format a float for the `dec` attribute, the inverse of [`parse_float_dec`].
fn format_float_dec(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-INF".to_owned()
        } else {
            "INF".to_owned()
        }
    } else {
        format!("{value:e}")
    }
}

/// Encode an OpenMath tree to its XML wire form.
#[must_use]
pub fn encode_to_string(node: &OmNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &OmNode, out: &mut String) {
    let name = node.tag.element_name();
    match &node.payload {
        Some(OmPayload::Symbol { cd, name: sym, cdbase }) => {
            out.push_str(&format!("<{name} cd=\"{}\" name=\"{}\"", escape_attr(cd), escape_attr(sym)));
            if let Some(base) = cdbase {
                out.push_str(&format!(" cdbase=\"{}\"", escape_attr(base)));
            }
            out.push_str("/>");
        }
        Some(OmPayload::Var(v)) => {
            out.push_str(&format!("<{name} name=\"{}\"/>", escape_attr(v)));
        }
        Some(OmPayload::Float(f)) => {
            out.push_str(&format!("<{name} dec=\"{}\"/>", escape_attr(&format_float_dec(*f))));
        }
        Some(OmPayload::Int(i)) => {
            out.push_str(&format!("<{name}>{i}</{name}>"));
        }
        Some(OmPayload::Str(s)) => {
            out.push_str(&format!("<{name}>{}</{name}>", escape_text(s)));
        }
        Some(OmPayload::Bytes(b)) => {
            out.push_str(&format!("<{name}>{}</{name}>", BASE64.encode(b)));
        }
        Some(OmPayload::Foreign { encoding, data }) => {
            out.push_str(&format!("<{name}"));
            if let Some(enc) = encoding {
                out.push_str(&format!(" encoding=\"{}\"", escape_attr(enc)));
            }
            out.push('>');
            out.push_str(&escape_text(data));
            out.push_str(&format!("</{name}>"));
        }
        None => {
            if node.children.is_empty() {
                out.push_str(&format!("<{name}/>"));
            } else {
                out.push_str(&format!("<{name}>"));
                for child in &node.children {
                    write_node(child, out);
                }
                out.push_str(&format!("</{name}>"));
            }
        }
    }
}

fn escape_text(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String { escape_text(value).replace('"', "&quot;") }
