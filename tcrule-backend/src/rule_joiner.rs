//! Rule Joiner: reconstructs logical rules from filters and qdiscs.
//!
//! A classifier feeds a shaping qdisc when both sit on the same device and
//! the qdisc's parent is the classifier's flow id. Several classifiers may
//! feed the same qdisc (that is how profile reuse works), so a qdisc joins
//! every classifier that targets it. What is left over on either side is
//! still reported, as a partial rule.

use tcrule_shared::{Filter, LossPct, Qdisc, Rule, ShapingProfile};

/// Join filters to shaping qdiscs.
///
/// Output order: one rule per filter that has a flow id (joined or
/// filter-only), in filter order, then one per shaping qdisc nobody
/// classifies into, in qdisc order.
pub fn join(filters: &[Filter], qdiscs: &[Qdisc]) -> Vec<Rule> {
    let mut consumed = vec![false; qdiscs.len()];
    let mut rules = Vec::new();

    for (fi, filter) in filters.iter().enumerate() {
        let Some(flow_id) = filter.flow_id() else {
            continue;
        };

        let target = qdiscs.iter().enumerate().find(|(_, q)| {
            q.is_shaping() && q.is_on(&filter.interface) && q.parent.as_deref() == Some(flow_id)
        });

        let mut rule = Rule {
            interface: filter.interface.clone(),
            predicates: filter.predicates().cloned().unwrap_or_default(),
            flow_id: Some(flow_id.to_string()),
            filter_handle: filter.handle().map(str::to_string),
            filter_index: Some(fi),
            ..Default::default()
        };
        if let Some((qi, qdisc)) = target {
            consumed[qi] = true;
            attach_qdisc(&mut rule, qi, qdisc);
        }
        rules.push(rule);
    }

    for (qi, qdisc) in qdiscs.iter().enumerate() {
        if consumed[qi] || !qdisc.is_shaping() {
            continue;
        }
        let (Some(dev), Some(parent)) = (&qdisc.dev, &qdisc.parent) else {
            continue;
        };
        let mut rule = Rule {
            interface: dev.clone(),
            flow_id: Some(parent.clone()),
            ..Default::default()
        };
        attach_qdisc(&mut rule, qi, qdisc);
        rules.push(rule);
    }

    rules
}

fn attach_qdisc(rule: &mut Rule, index: usize, qdisc: &Qdisc) {
    rule.profile = ShapingProfile::from_qdisc(qdisc);
    rule.corrupt_pct = qdisc.corrupt_fraction().and_then(LossPct::from_fraction);
    rule.qdisc_handle = qdisc.handle.clone();
    rule.qdisc_index = Some(index);
}
