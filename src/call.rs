//! Procedure-call verifier (spec §4.3): validates and decomposes the
//! structural shape of a decoded OpenMath tree into a [`ProcedureCall`].

use std::collections::BTreeMap;

use crate::errors::ScscpError;
use crate::openmath::{OmNode, OmPayload, OmTag};

/// Declared shape of a procedure's response (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    /// The caller expects no result body.
    Nothing,
    /// The caller expects the result object inline.
    Object,
    /// The caller expects a server-side reference (spec §9 open question).
    Cookie,
}

impl ReturnType {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "nothing" => Some(Self::Nothing),
            "object" => Some(Self::Object),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }
}

/// A decoded, structurally valid procedure call (spec §3, §4.3 item 5).
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    /// The client-chosen call identifier.
    pub call_id: String,
    /// Declared response shape.
    pub return_type: ReturnType,
    /// Content dictionary of the requested procedure.
    pub cd: String,
    /// Name of the requested procedure within `cd`.
    pub name: String,
    /// Ordered argument list.
    pub args: Vec<OmNode>,
    /// Recognised `option_*` values other than `call_id`/`option_return_*`.
    pub options: BTreeMap<String, String>,
}

const SCSCP1: &str = "scscp1";
const RECOGNISED_OPTIONS: &[&str] = &[
    "option_runtime",
    "option_min_memory",
    "option_max_memory",
    "option_debuglevel",
];

/// Verify and decompose a decoded OpenMath tree as a `procedure_call`.
///
/// # Errors
///
/// Returns [`ScscpError::InvalidCall`] identifying the failing structural
/// step (spec §4.3).
#[expect(clippy::shadow_reuse, reason = "intentional shadowing while narrowing Option fields to their verified value")]
pub fn verify(tree: &OmNode) -> Result<ProcedureCall, ScscpError> {
    let invalid = |reason: &str| ScscpError::InvalidCall(reason.to_owned());

    // 1. Root is OBJ with exactly one child, an ATTR.
    if tree.tag != OmTag::Obj {
        return Err(invalid("root is not OMOBJ"));
    }
    let attr = one_child(&tree.children).ok_or_else(|| invalid("OMOBJ must wrap exactly one child"))?;
    if attr.tag != OmTag::Attr {
        return Err(invalid("OMOBJ child is not OMATTR"));
    }

    // 2. ATTR has children (ATP, A).
    let [atp, application] = two_children(&attr.children)
        .ok_or_else(|| invalid("OMATTR must have exactly two children"))?;
    if atp.tag != OmTag::Atp {
        return Err(invalid("OMATTR first child is not OMATP"));
    }
    if application.tag != OmTag::A {
        return Err(invalid("OMATTR second child is not OMA"));
    }

    // 3. A has children (S, A') where S = scscp1.procedure_call.
    let (marker, call_body) = application
        .children
        .split_first()
        .ok_or_else(|| invalid("procedure_call OMA has no children"))?;
    let (marker_cd, marker_name) = marker
        .as_symbol()
        .ok_or_else(|| invalid("procedure_call OMA head is not OMS"))?;
    if marker_cd != SCSCP1 || marker_name != "procedure_call" {
        return Err(invalid("OMA head is not scscp1.procedure_call"));
    }

    // 4. call_body: first child is the procedure symbol, rest are arguments.
    let (proc_symbol, args) = call_body
        .split_first()
        .ok_or_else(|| invalid("procedure_call has no procedure symbol"))?;
    let (cd, name) = proc_symbol
        .as_symbol()
        .ok_or_else(|| invalid("procedure symbol is not OMS with cd/name"))?;

    // 5. ATP: even children, (S, value) pairs.
    if atp.children.len() % 2 != 0 {
        return Err(invalid("OMATP has an odd number of children"));
    }
    let mut call_id: Option<String> = None;
    let mut return_type: Option<ReturnType> = None;
    let mut options = BTreeMap::new();
    for pair in atp.children.chunks(2) {
        let [sym, value] = pair else {
            return Err(invalid("OMATP pair malformed"));
        };
        let (option_cd, option_name) = sym
            .as_symbol()
            .ok_or_else(|| invalid("OMATP key is not OMS"))?;
        if option_cd != SCSCP1 {
            return Err(invalid("OMATP key is not in scscp1"));
        }
        if option_name == "call_id" {
            if call_id.is_some() {
                return Err(invalid("duplicate call_id"));
            }
            let value = value
                .as_str_payload()
                .ok_or_else(|| invalid("call_id value is not OMSTR"))?;
            call_id = Some(value.to_owned());
        } else if let Some(suffix) = option_name.strip_prefix("option_return_") {
            if return_type.is_some() {
                return Err(invalid("duplicate option_return_*"));
            }
            return_type = Some(
                ReturnType::from_suffix(suffix)
                    .ok_or_else(|| invalid("unrecognised option_return_* suffix"))?,
            );
        } else if RECOGNISED_OPTIONS.contains(&option_name) {
            if let Some(text) = value.as_str_payload() {
                options.insert(option_name.to_owned(), text.to_owned());
            }
        } else if option_name.starts_with("option_") {
            if let Some(text) = value.as_str_payload() {
                options.insert(option_name.to_owned(), text.to_owned());
            }
        }
    }

    let call_id = call_id.ok_or_else(|| invalid("missing call_id"))?;
    let return_type = return_type.ok_or_else(|| invalid("missing option_return_*"))?;

    Ok(ProcedureCall {
        call_id,
        return_type,
        cd: cd.to_owned(),
        name: name.to_owned(),
        args: args.to_vec(),
        options,
    })
}

/// Best-effort extraction of a `call_id` from a tree that failed [`verify`].
///
/// Used by the session to decide whether an `InvalidCall` failure can still
/// be reported to the client as a `procedure_terminated` (spec §7): if the
/// ATP pairs are reachable and carry a `call_id`, we have enough to attribute
/// the response even though the rest of the call was malformed.
#[must_use]
pub fn try_extract_call_id(tree: &OmNode) -> Option<String> {
    let attr = one_child(&tree.children).filter(|n| n.tag == OmTag::Attr)?;
    let [atp, _] = two_children(&attr.children)?;
    if atp.tag != OmTag::Atp || atp.children.len() % 2 != 0 {
        return None;
    }
    for pair in atp.children.chunks(2) {
        let [sym, value] = pair else { continue };
        if sym.as_symbol() == Some((SCSCP1, "call_id")) {
            return value.as_str_payload().map(str::to_owned);
        }
    }
    None
}

fn one_child(children: &[OmNode]) -> Option<&OmNode> {
    match children {
        [only] => Some(only),
        _ => None,
    }
}

fn two_children(children: &[OmNode]) -> Option<[&OmNode; 2]> {
    match children {
        [a, b] => Some([a, b]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openmath::OmNode;

    fn valid_call(call_id: &str, return_suffix: &str) -> OmNode {
        let atp = OmNode::attribute_pairs(vec![
            (
                OmNode::symbol(SCSCP1, "call_id"),
                OmNode::string(call_id),
            ),
            (
                OmNode::symbol(SCSCP1, format!("option_return_{return_suffix}")),
                OmNode::string("true"),
            ),
        ]);
        let application = OmNode::application(
            OmNode::symbol(SCSCP1, "procedure_call"),
            vec![OmNode::application(
                OmNode::symbol("arith1", "plus"),
                vec![OmNode::int(2), OmNode::int(3)],
            )],
        );
        OmNode::object(OmNode::attribution(atp, application))
    }

    #[test]
    fn accepts_well_formed_call() {
        let tree = valid_call("c1", "object");
        let call = verify(&tree).expect("verify");
        assert_eq!(call.call_id, "c1");
        assert_eq!(call.return_type, ReturnType::Object);
        assert_eq!(call.cd, "arith1");
        assert_eq!(call.name, "plus");
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn rejects_duplicate_call_id() {
        let atp = OmNode::attribute_pairs(vec![
            (OmNode::symbol(SCSCP1, "call_id"), OmNode::string("a")),
            (OmNode::symbol(SCSCP1, "call_id"), OmNode::string("b")),
            (
                OmNode::symbol(SCSCP1, "option_return_object"),
                OmNode::string("t"),
            ),
        ]);
        let application = OmNode::application(
            OmNode::symbol(SCSCP1, "procedure_call"),
            vec![OmNode::application(
                OmNode::symbol("arith1", "plus"),
                vec![],
            )],
        );
        let tree = OmNode::object(OmNode::attribution(atp, application));
        assert!(matches!(verify(&tree), Err(ScscpError::InvalidCall(_))));
    }

    #[test]
    fn rejects_missing_return_type() {
        let atp = OmNode::attribute_pairs(vec![(
            OmNode::symbol(SCSCP1, "call_id"),
            OmNode::string("a"),
        )]);
        let application = OmNode::application(
            OmNode::symbol(SCSCP1, "procedure_call"),
            vec![OmNode::application(
                OmNode::symbol("arith1", "plus"),
                vec![],
            )],
        );
        let tree = OmNode::object(OmNode::attribution(atp, application));
        assert!(matches!(verify(&tree), Err(ScscpError::InvalidCall(_))));
    }

    #[test]
    fn rejects_wrong_root_tag() {
        let tree = OmNode::int(1);
        assert!(matches!(verify(&tree), Err(ScscpError::InvalidCall(_))));
    }

    #[test]
    fn is_idempotent_on_accepted_domain() {
        let tree = valid_call("c2", "nothing");
        let first = verify(&tree).expect("first verify");
        let second = verify(&tree).expect("second verify");
        assert_eq!(first.call_id, second.call_id);
        assert_eq!(first.return_type, second.return_type);
    }

    #[test]
    fn captures_recognised_options() {
        let atp = OmNode::attribute_pairs(vec![
            (OmNode::symbol(SCSCP1, "call_id"), OmNode::string("c3")),
            (
                OmNode::symbol(SCSCP1, "option_return_cookie"),
                OmNode::string("t"),
            ),
            (
                OmNode::symbol(SCSCP1, "option_runtime"),
                OmNode::string("5"),
            ),
        ]);
        let application = OmNode::application(
            OmNode::symbol(SCSCP1, "procedure_call"),
            vec![OmNode::application(
                OmNode::symbol("arith1", "plus"),
                vec![],
            )],
        );
        let tree = OmNode::object(OmNode::attribution(atp, application));
        let call = verify(&tree).expect("verify");
        assert_eq!(call.options.get("option_runtime"), Some(&"5".to_owned()));
        assert_eq!(call.return_type, ReturnType::Cookie);
    }
}
