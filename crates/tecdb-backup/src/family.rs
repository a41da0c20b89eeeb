//! Family-link reconstruction for desired-state lists.
//!
//! Lists parsed from a backup document arrive without father/son/brother
//! links. The instances are sorted into child-first OID order, after which
//! every instance is immediately followed by its descendants; a single walk
//! with a depth counter then recovers the parent of every entry.

use tecdb_error::{CfgError, Result};
use tecdb_types::cmp_child_first;

use crate::desired::DesiredList;

/// Fill father/son/brother links of every entry.
///
/// Parent selection between the previous entry at depth `p` and the current
/// one at depth `c`:
/// - `c == p + 1`: the previous entry is the parent;
/// - `c <= p`: walk the previous entry's father chain `p - c + 1` steps;
/// - `c > p + 1`: a hierarchy level is missing from the list.
///
/// Entries at the top level keep no father and are reached through the
/// chain; deeper entries are linked as the leftmost son of their parent.
pub fn fill_children(list: &mut DesiredList) -> Result<()> {
    let mut refs = list.chain();
    refs.sort_by(|&a, &b| cmp_child_first(list.get(a).oid.as_str(), list.get(b).oid.as_str()));

    let mut prev_level: Option<usize> = None;
    for i in 0..refs.len() {
        let entry = refs[i];
        let level = list.get(entry).oid.depth();

        let mut parent = if i == 0 {
            None
        } else {
            list.get(refs[i - 1]).father
        };
        match prev_level {
            Some(prev) if prev < level => {
                if prev < level - 1 {
                    return Err(CfgError::NoImmediateParent {
                        oid: list.get(entry).oid.as_str().to_owned(),
                    });
                }
                parent = Some(refs[i - 1]);
            }
            Some(prev) if prev > level => {
                let mut steps = prev - level;
                while parent.is_some() && steps > 0 {
                    parent = list.get(parent.unwrap()).father;
                    steps -= 1;
                }
            }
            _ => {}
        }

        if let Some(p) = parent {
            let parent_oid = list.get(p).oid.clone();
            if !parent_oid.is_prefix_of(&list.get(entry).oid) {
                return Err(CfgError::NotParent {
                    parent: parent_oid.as_str().to_owned(),
                    child: list.get(entry).oid.as_str().to_owned(),
                });
            }
            let first = list.get(p).son;
            list.get_mut(entry).brother = first;
            list.get_mut(p).son = Some(entry);
            list.get_mut(entry).father = Some(p);
        }

        prev_level = Some(level);
    }
    Ok(())
}
