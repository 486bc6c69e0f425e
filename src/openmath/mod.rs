//! The OpenMath object model (spec §3) and its incremental XML codec
//! (spec §4.2).
//!
//! Only the subset of OpenMath needed to decode procedure calls and encode
//! `procedure_completed`/`procedure_terminated` results is modelled: the
//! twelve tags named in spec §3, each either a typed leaf (`I`, `F`, `STR`,
//! `B`, `S`, `V`) or a compound node holding an ordered child list (`OBJ`,
//! `A`, `ATTR`, `ATP`, `BIND`, `ERR`, `FOREIGN`).

mod codec;

use std::fmt;

pub use codec::{Parser, decode_transaction, encode_to_string};

/// Closed set of OpenMath tags this codec understands (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OmTag {
    /// `OMOBJ` — the document root, wrapping exactly one child.
    Obj,
    /// `OMI` — an arbitrary-precision integer (modelled as `i64`).
    I,
    /// `OMF` — an IEEE double.
    F,
    /// `OMSTR` — a Unicode string.
    Str,
    /// `OMB` — a byte string, base64-encoded on the wire.
    B,
    /// `OMS` — a symbol, identified by content dictionary + name.
    S,
    /// `OMV` — a variable, identified by name.
    V,
    /// `OMA` — application: head symbol applied to an argument list.
    A,
    /// `OMATTR` — attribution: an `ATP` pairs-list followed by a body.
    Attr,
    /// `OMATP` — an attribute-pairs list, `(symbol, value)*`.
    Atp,
    /// `OMBIND` — a variable binder.
    Bind,
    /// `OMERR` — an error object.
    Err,
    /// `OMFOREIGN` — an opaque foreign-encoded object.
    Foreign,
}

impl OmTag {
    /// The XML element name for this tag (e.g. `"OMOBJ"`).
    #[must_use]
    pub const fn element_name(self) -> &'static str {
        match self {
            Self::Obj => "OMOBJ",
            Self::I => "OMI",
            Self::F => "OMF",
            Self::Str => "OMSTR",
            Self::B => "OMB",
            Self::S => "OMS",
            Self::V => "OMV",
            Self::A => "OMA",
            Self::Attr => "OMATTR",
            Self::Atp => "OMATP",
            Self::Bind => "OMBIND",
            Self::Err => "OMERR",
            Self::Foreign => "OMFOREIGN",
        }
    }

    /// Parse an element name into its tag, if recognised.
    #[must_use]
    pub fn from_element_name(name: &str) -> Option<Self> {
        Some(match name {
            "OMOBJ" => Self::Obj,
            "OMI" => Self::I,
            "OMF" => Self::F,
            "OMSTR" => Self::Str,
            "OMB" => Self::B,
            "OMS" => Self::S,
            "OMV" => Self::V,
            "OMA" => Self::A,
            "OMATTR" => Self::Attr,
            "OMATP" => Self::Atp,
            "OMBIND" => Self::Bind,
            "OMERR" => Self::Err,
            "OMFOREIGN" => Self::Foreign,
            _ => return None,
        })
    }
}

/// The typed payload carried by leaf nodes (`I`, `F`, `STR`, `B`, `S`, `V`).
#[derive(Debug, Clone, PartialEq)]
pub enum OmPayload {
    /// `OMI` payload.
    Int(i64),
    /// `OMF` payload.
    Float(f64),
    /// `OMSTR` payload.
    Str(String),
    /// `OMB` payload (decoded bytes; base64 only on the wire).
    Bytes(Vec<u8>),
    /// `OMV` payload: the variable name.
    Var(String),
    /// `OMS` payload: content dictionary, name, and optional base URI.
    Symbol {
        /// Content dictionary name.
        cd: String,
        /// Symbol name within `cd`.
        name: String,
        /// Optional `cdbase` URI.
        cdbase: Option<String>,
    },
    /// `OMFOREIGN` payload: an opaque encoding tag and raw text.
    Foreign {
        /// The `encoding` attribute, if present.
        encoding: Option<String>,
        /// The raw text content.
        data: String,
    },
}

/// One node of an OpenMath tree.
#[derive(Debug, Clone, PartialEq)]
pub struct OmNode {
    /// The node's tag.
    pub tag: OmTag,
    /// The typed payload, present only on leaf tags.
    pub payload: Option<OmPayload>,
    /// Ordered children. Empty for leaves.
    pub children: Vec<OmNode>,
}

impl OmNode {
    /// Build an `OMOBJ` wrapping `child`.
    #[must_use]
    pub fn object(child: OmNode) -> Self {
        Self {
            tag: OmTag::Obj,
            payload: None,
            children: vec![child],
        }
    }

    /// Build an `OMI` integer leaf.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self {
            tag: OmTag::I,
            payload: Some(OmPayload::Int(value)),
            children: Vec::new(),
        }
    }

    /// Build an `OMF` float leaf.
    #[must_use]
    pub fn float(value: f64) -> Self {
        Self {
            tag: OmTag::F,
            payload: Some(OmPayload::Float(value)),
            children: Vec::new(),
        }
    }

    /// Build an `OMSTR` string leaf.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            tag: OmTag::Str,
            payload: Some(OmPayload::Str(value.into())),
            children: Vec::new(),
        }
    }

    /// Build an `OMB` byte-string leaf.
    #[must_use]
    pub fn bytes(value: Vec<u8>) -> Self {
        Self {
            tag: OmTag::B,
            payload: Some(OmPayload::Bytes(value)),
            children: Vec::new(),
        }
    }

    /// Build an `OMV` variable leaf.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self {
            tag: OmTag::V,
            payload: Some(OmPayload::Var(name.into())),
            children: Vec::new(),
        }
    }

    /// Build an `OMS` symbol leaf.
    #[must_use]
    pub fn symbol(cd: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: OmTag::S,
            payload: Some(OmPayload::Symbol {
                cd: cd.into(),
                name: name.into(),
                cdbase: None,
            }),
            children: Vec::new(),
        }
    }

    /// Build an `OMA` application of `head` to `args`.
    #[must_use]
    pub fn application(head: OmNode, args: Vec<OmNode>) -> Self {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.push(head);
        children.extend(args);
        Self {
            tag: OmTag::A,
            payload: None,
            children,
        }
    }

    /// Build an `OMATP` attribute-pairs list from `(symbol, value)` pairs.
    #[must_use]
    pub fn attribute_pairs(pairs: Vec<(OmNode, OmNode)>) -> Self {
        let mut children = Vec::with_capacity(pairs.len() * 2);
        for (sym, value) in pairs {
            children.push(sym);
            children.push(value);
        }
        Self {
            tag: OmTag::Atp,
            payload: None,
            children,
        }
    }

    /// Build an `OMATTR` attribution of `atp` to `body`.
    #[must_use]
    pub fn attribution(atp: OmNode, body: OmNode) -> Self {
        Self {
            tag: OmTag::Attr,
            payload: None,
            children: vec![atp, body],
        }
    }

    /// Build an `OMERR` error object from a symbol and trailing detail nodes.
    #[must_use]
    pub fn error(symbol: OmNode, details: Vec<OmNode>) -> Self {
        let mut children = Vec::with_capacity(details.len() + 1);
        children.push(symbol);
        children.extend(details);
        Self {
            tag: OmTag::Err,
            payload: None,
            children,
        }
    }

    /// Build an `OMBIND` binder from a head symbol, bound variables, and body.
    #[must_use]
    pub fn binding(head: OmNode, variables: Vec<OmNode>, body: OmNode) -> Self {
        let mut children = Vec::with_capacity(variables.len() + 2);
        children.push(head);
        children.extend(variables);
        children.push(body);
        Self {
            tag: OmTag::Bind,
            payload: None,
            children,
        }
    }

    /// Build an `OMFOREIGN` opaque object.
    #[must_use]
    pub fn foreign(encoding: Option<String>, data: impl Into<String>) -> Self {
        Self {
            tag: OmTag::Foreign,
            payload: Some(OmPayload::Foreign {
                encoding,
                data: data.into(),
            }),
            children: Vec::new(),
        }
    }

    /// If this is an `OMSTR` leaf, its string payload.
    #[must_use]
    pub fn as_str_payload(&self) -> Option<&str> {
        match &self.payload {
            Some(OmPayload::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// If this is an `OMS` leaf, its `(cd, name)` pair.
    #[must_use]
    pub fn as_symbol(&self) -> Option<(&str, &str)> {
        match &self.payload {
            Some(OmPayload::Symbol { cd, name, .. }) => Some((cd.as_str(), name.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for OmNode {
    /// A compact debug rendering, used only for `tracing::debug!` lines —
    /// not the wire format (see [`codec::encode_to_string`] for that).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag.element_name())?;
        if let Some(payload) = &self.payload {
            write!(f, "[{payload:?}]")?;
        }
        if !self.children.is_empty() {
            write!(f, "(")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
