//! Plain-text rendering of changes and nodes.

use claimtrie::{Change, Node};

/// Print one change record.
pub fn show_change(chg: &Change) {
    println!(
        ">>> Height: {:6}: {} for {}, {}, {}",
        chg.height, chg.change_type, chg.claim_id, chg.amount, chg.out_point
    );
}

/// Print a node: takeover height, then each claim with its supports.
pub fn show_node(node: &Node) {
    let mut node = node.clone();

    println!("{}", "-".repeat(120));
    println!("Last Node Takeover: {}\n", node.taken_over_at);

    let best = node.best_claim().map(|c| c.claim_id);
    node.sort_claims();
    for claim in &node.claims {
        let mark = if Some(claim.claim_id) == best { "*" } else { " " };
        println!(
            "{}  C  ID: {}, TXO: {}\n   {:5}/{:<5}, Status: {:9}, Amount: {:15}, Effective Amount: {:15}",
            mark,
            claim.claim_id,
            claim.out_point,
            claim.accepted_at,
            claim.active_at,
            claim.status.to_string(),
            claim.amount,
            node.effective_amount(claim),
        );
        for support in node.supports.iter().filter(|s| s.claim_id == claim.claim_id) {
            println!(
                "    S id: {}, op: {}, {:5}/{:<5}, {:9}, amt: {:15}",
                support.claim_id,
                support.out_point,
                support.accepted_at,
                support.active_at,
                support.status.to_string(),
                support.amount,
            );
        }
    }
    println!();
}
