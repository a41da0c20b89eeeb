//! Topological ordering of the desired-state list.
//!
//! A stable merge-sort of the chain by ascending object ordinal: masters
//! come before their dependants and parents before their children, so the
//! restore loop can create prerequisites first. Ties keep document order.

use tecdb_db::ObjectRegistry;
use tracing::error;

use crate::desired::DesiredList;

/// Sort the chain by ascending object ordinal, then validate monotonicity.
///
/// An inversion after sorting means the registry holds ordinals that do not
/// respect the hierarchy, possible when objects opted out of ordinal
/// maintenance with `no_parent_dep`. It is logged, not fatal: the restore
/// loop's inner retry recovers the affected instances.
pub fn topo_sort(list: &mut DesiredList, registry: &ObjectRegistry) {
    let mut order = list.chain();
    order.sort_by_key(|&i| registry.get(list.get(i).object).ordinal);
    list.relink(&order);

    let mut seq = 0u32;
    for &i in &order {
        let entry = list.get(i);
        let ordinal = registry.get(entry.object).ordinal;
        if ordinal < seq {
            error!(
                oid = entry.oid.as_str(),
                ordinal, seq, "dependency order is broken"
            );
        }
        seq = ordinal;
    }
}

#[cfg(test)]
mod tests {
    use tecdb_db::{DepScope, Handle, ObjectRegistry, RegisterRequest};
    use tecdb_types::{CfgValue, Oid};

    use super::*;
    use crate::desired::DesiredList;

    fn oid(s: &str) -> Oid {
        Oid::new(s).unwrap()
    }

    #[test]
    fn sorts_masters_first() {
        let mut reg = ObjectRegistry::new();
        for o in ["/a", "/b", "/c"] {
            reg.register(&RegisterRequest::plain(oid(o))).unwrap();
        }
        // /a depends on /c: instances of /c must restore before /a's.
        reg.add_dependency(&oid("/a"), &oid("/c"), DepScope::Instance)
            .unwrap();

        let mut list = DesiredList::new();
        for o in ["/a:1", "/b:1", "/c:1"] {
            let inst = oid(o);
            let object = reg.find_for_instance(&inst).unwrap();
            list.push(inst, object, CfgValue::None, Handle::INVALID);
        }
        topo_sort(&mut list, &reg);

        let order: Vec<&str> = list.iter().map(|e| e.oid.as_str()).collect();
        let pos = |o: &str| order.iter().position(|&x| x == o).unwrap();
        assert!(pos("/c:1") < pos("/a:1"));
        assert!(pos("/b:1") < pos("/a:1"));
    }

    #[test]
    fn parents_sort_before_children() {
        let mut reg = ObjectRegistry::new();
        reg.register(&RegisterRequest::plain(oid("/p"))).unwrap();
        reg.register(&RegisterRequest::plain(oid("/p/c"))).unwrap();

        let mut list = DesiredList::new();
        // Document order lists the child first.
        for o in ["/p:1/c:1", "/p:1"] {
            let inst = oid(o);
            let object = reg.find_for_instance(&inst).unwrap();
            list.push(inst, object, CfgValue::None, Handle::INVALID);
        }
        topo_sort(&mut list, &reg);
        let order: Vec<&str> = list.iter().map(|e| e.oid.as_str()).collect();
        assert_eq!(order, ["/p:1", "/p:1/c:1"]);
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let mut reg = ObjectRegistry::new();
        reg.register(&RegisterRequest::plain(oid("/a"))).unwrap();
        reg.register(&RegisterRequest::plain(oid("/b"))).unwrap();
        // Same ordinal for /a and /b.
        let mut list = DesiredList::new();
        for o in ["/b:2", "/a:1", "/b:1"] {
            let inst = oid(o);
            let object = reg.find_for_instance(&inst).unwrap();
            list.push(inst, object, CfgValue::None, Handle::INVALID);
        }
        topo_sort(&mut list, &reg);
        let order: Vec<&str> = list.iter().map(|e| e.oid.as_str()).collect();
        assert_eq!(order, ["/b:2", "/a:1", "/b:1"]);
    }
}
