//! Backup document codec: read object/instance entries, emit backup and
//! filter documents.
//!
//! The reader walks neutral [`Node`] trees and turns entries into requests
//! on the message surface; the writer renders live state depth-first. Both
//! directions share the attribute vocabulary with the wire contract:
//! `oid`, `access`, `type`, `default`, `unit`, `volatile`, `parent-dep`
//! on `<object>`; `oid`, `scope` on `<depends>`; `oid`, `value` on
//! `<instance>`.

use std::fmt::Write as _;

use tecdb_db::{AccessMode, CfgRequest, Database, DepScope, Handle, ObjectId, RegisterRequest};
use tecdb_error::{CfgError, Result};
use tecdb_types::{CfgValue, Oid, ValueType};
use tracing::error;

use crate::desired::DesiredList;
use crate::doc::{Content, Node, parse_document, xml_escape};

/// Walk the `<object>` entries heading a `<backup>` document.
///
/// Returns the index of the first child that is not an object entry (text
/// and comment nodes are skipped in place). With `register` unset the
/// entries are skipped without registration: the restore path, where the
/// schema is already live.
pub fn register_objects(db: &mut Database, children: &[Content], register: bool) -> Result<usize> {
    for (i, content) in children.iter().enumerate() {
        let Content::Element(node) = content else {
            continue;
        };
        if node.name != "object" {
            return Ok(i);
        }
        if register {
            register_one_object(db, node)?;
        }
    }
    Ok(children.len())
}

fn parse_bool_attr(tag: &'static str, attr: &'static str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CfgError::BadAttribute {
            tag,
            attr,
            value: value.to_owned(),
        }),
    }
}

fn register_one_object(db: &mut Database, node: &Node) -> Result<()> {
    let oid_attr = node.attr("oid").ok_or(CfgError::MissingAttribute {
        tag: "object",
        attr: "oid",
    })?;
    let oid = Oid::new(oid_attr)?;

    let mut req = RegisterRequest::plain(oid.clone());
    req.no_parent_dep = node.attr("parent-dep") == Some("no");
    req.default_value = node.attr("default").map(ToOwned::to_owned);
    if let Some(ty) = node.attr("type") {
        req.value_type = ValueType::from_wire(ty)?;
    }
    if let Some(v) = node.attr("volatile") {
        req.volatile = parse_bool_attr("object", "volatile", v)?;
    }
    if let Some(u) = node.attr("unit") {
        req.unit = parse_bool_attr("object", "unit", u)?;
    }
    if let Some(a) = node.attr("access") {
        req.access = AccessMode::from_wire(a)?;
    }

    db.process(CfgRequest::Register(req), true)?;
    register_dependencies(db, &node.children, &oid)
}

/// Parse the `<depends>` sub-entries of an object entry.
///
/// `scope` defaults to instance; only the literal `object` selects the
/// object-wide scope.
pub fn register_dependencies(db: &mut Database, children: &[Content], dependant: &Oid) -> Result<()> {
    for content in children {
        let Content::Element(node) = content else {
            continue;
        };
        if node.name != "depends" {
            return Err(CfgError::UnexpectedTag {
                tag: node.name.clone(),
            });
        }
        let target = node.attr("oid").ok_or(CfgError::MissingAttribute {
            tag: "depends",
            attr: "oid",
        })?;
        if node.has_content() {
            return Err(CfgError::ElementNotEmpty { tag: "depends" });
        }
        let object_wide = node.attr("scope") == Some("object");
        db.process(
            CfgRequest::AddDependency {
                dependant: dependant.clone(),
                target: Oid::new(target)?,
                object_wide,
            },
            true,
        )?;
    }
    Ok(())
}

/// Build the desired-state list from the `<instance>` entries.
///
/// Each descriptor resolves its object by OID shape and picks up the
/// existing store handle when the instance is already live. A value is
/// mandatory for typed objects and prohibited for valueless ones.
pub fn parse_instances(db: &Database, children: &[Content]) -> Result<DesiredList> {
    let mut list = DesiredList::new();
    for content in children {
        let Content::Element(node) = content else {
            continue;
        };
        if node.name != "instance" {
            return Err(CfgError::UnexpectedTag {
                tag: node.name.clone(),
            });
        }
        if node.has_content() {
            return Err(CfgError::ElementNotEmpty { tag: "instance" });
        }
        let oid_attr = node.attr("oid").ok_or(CfgError::MissingAttribute {
            tag: "instance",
            attr: "oid",
        })?;
        let oid = Oid::new(oid_attr)?;
        let object = db
            .registry()
            .find_for_instance(&oid)
            .ok_or_else(|| CfgError::ObjectNotFound {
                oid: oid.as_str().to_owned(),
            })?;
        let handle = db.store().find(oid.as_str()).unwrap_or(Handle::INVALID);

        let value_type = db.registry().get(object).value_type;
        let valueless = matches!(value_type, ValueType::None | ValueType::Unspecified);
        let value = match node.attr("value") {
            Some(text) => {
                if valueless {
                    return Err(CfgError::ValueProhibited {
                        oid: oid.as_str().to_owned(),
                    });
                }
                CfgValue::parse(value_type, text)?
            }
            None => {
                if !valueless {
                    return Err(CfgError::MissingValue {
                        oid: oid.as_str().to_owned(),
                    });
                }
                CfgValue::None
            }
        };
        list.push(oid, object, value, handle);
    }
    Ok(list)
}

/// Render a backup document describing live state.
///
/// Objects first, depth-first, skipping the root and the agent schema
/// subtree; then instances depth-first, skipping the root instance, agent
/// root nodes and volatile subtrees. A non-empty subtree filter emits only
/// the named instance subtrees and fails with `ENOENT` when one of them is
/// not live.
pub fn write_backup(db: &Database, subtrees: &[Oid]) -> Result<String> {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<backup>\n");
    put_object(db, db.registry().root(), &mut out);

    if subtrees.is_empty() {
        put_instance(db, db.store().root(), &mut out);
    } else {
        for subtree in subtrees {
            let Some(handle) = db.store().find(subtree.as_str()) else {
                error!(oid = subtree.as_str(), "no instance for backup subtree");
                return Err(CfgError::not_found(subtree.as_str()));
            };
            put_instance(db, handle, &mut out);
        }
    }

    out.push_str("\n</backup>\n");
    Ok(out)
}

fn put_object(db: &Database, id: ObjectId, out: &mut String) {
    let obj = db.registry().get(id);
    if id != db.registry().root() && !obj.oid.in_agent_object_subtree() {
        let _ = write!(
            out,
            "\n  <object oid=\"{}\" access=\"{}\" type=\"{}\"",
            xml_escape(obj.oid.as_str()),
            obj.access.wire_name(),
            obj.value_type.wire_name(),
        );
        if let Some(def) = &obj.default_value {
            let _ = write!(out, " default=\"{}\"", xml_escape(&def.to_text()));
        }
        if obj.unit {
            out.push_str(" unit=\"true\"");
        }
        if obj.volatile {
            out.push_str(" volatile=\"true\"");
        }
        if obj.no_parent_dep {
            out.push_str(" parent-dep=\"no\"");
        }

        let explicit: Vec<_> = obj
            .depends_on
            .iter()
            .filter(|d| !d.implicit_parent)
            .collect();
        if explicit.is_empty() {
            out.push_str("/>\n");
        } else {
            out.push_str(">\n");
            for dep in explicit {
                let scope = match dep.scope {
                    DepScope::ObjectWide => "object",
                    DepScope::Instance => "instance",
                };
                let _ = write!(
                    out,
                    "    <depends oid=\"{}\" scope=\"{scope}\"/>\n",
                    xml_escape(db.registry().get(dep.target).oid.as_str()),
                );
            }
            out.push_str("  </object>\n");
        }
    }

    let children: Vec<ObjectId> = db.registry().children(id).collect();
    for child in children {
        put_object(db, child, out);
    }
}

fn put_instance(db: &Database, handle: Handle, out: &mut String) {
    let Some(inst) = db.store().get(handle) else {
        return;
    };
    if handle != db.store().root() && !inst.oid.is_agent_root() && !db.is_volatile(inst) {
        let _ = write!(out, "\n  <instance oid=\"{}\"", xml_escape(inst.oid.as_str()));
        let value_type = db.registry().get(inst.object).value_type;
        if !matches!(value_type, ValueType::None | ValueType::Unspecified) {
            let _ = write!(out, " value=\"{}\"", xml_escape(&inst.value.to_text()));
        }
        out.push_str("/>\n");
    }

    let mut son = inst.son;
    while let Some(s) = son {
        son = db.store().get(s).and_then(|i| i.brother);
        put_instance(db, s, out);
    }
}

/// Render a filter document listing subtree OIDs.
#[must_use]
pub fn write_filter(subtrees: &[Oid]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<filters>\n");
    for subtree in subtrees {
        let _ = write!(out, "<subtree>{}</subtree>\n", xml_escape(subtree.as_str()));
    }
    out.push_str("</filters>\n");
    out
}

/// Parse a filter document back into subtree OIDs.
pub fn parse_filter(text: &str) -> Result<Vec<Oid>> {
    let root = parse_document(text)?;
    if root.name != "filters" {
        return Err(CfgError::UnexpectedTag { tag: root.name });
    }
    let mut out = Vec::new();
    for content in &root.children {
        let Content::Element(node) = content else {
            continue;
        };
        if node.name != "subtree" {
            return Err(CfgError::UnexpectedTag {
                tag: node.name.clone(),
            });
        }
        out.push(Oid::new(node.text().trim())?);
    }
    Ok(out)
}
