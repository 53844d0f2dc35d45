//! The `cardmap approve` command for the filter checkpoint.
//!
//! Shows what the filter admitted and rejected, then records approval so
//! the next `cardmap run` continues past the checkpoint.

use clap::Args;
use console::style;
use dialoguer::Confirm;
use std::collections::BTreeMap;
use std::path::PathBuf;

use cardmap_core::types::{RejectReason, RejectedCard};
use cardmap_core::{Config, Orchestrator};

/// How many rejected cards to list per reason before truncating.
const REJECT_SAMPLE: usize = 5;

/// Arguments for the `approve` command.
#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// Config file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Artifact directory (overrides config)
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Approve without prompting
    #[arg(short, long)]
    pub yes: bool,
}

fn reason_key(reason: &RejectReason) -> &'static str {
    match reason {
        RejectReason::DisallowedTerm { .. } => "disallowed term",
        RejectReason::DomainExclusion { .. } => "domain exclusion",
        RejectReason::MissingImage => "missing image",
        RejectReason::UnreadableImage { .. } => "unreadable image",
        RejectReason::EmptyKeyword => "empty keyword",
    }
}

fn print_rejections(rejected: &[RejectedCard]) {
    let mut by_reason: BTreeMap<&str, Vec<&RejectedCard>> = BTreeMap::new();
    for card in rejected {
        by_reason.entry(reason_key(&card.reason)).or_default().push(card);
    }
    for (reason, cards) in by_reason {
        println!("  {} ({})", style(reason).yellow(), cards.len());
        for card in cards.iter().take(REJECT_SAMPLE) {
            println!("    - {} ({})", card.card.keyword, card.card.id);
        }
        if cards.len() > REJECT_SAMPLE {
            println!("    ... and {} more", cards.len() - REJECT_SAMPLE);
        }
    }
}

/// Execute the approve command.
pub async fn execute(args: ApproveArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &args.artifact_dir {
        config.output.artifact_dir = dir.clone();
    }
    let orchestrator = Orchestrator::new(config);

    let filtered = orchestrator.filter_artifact()?;

    println!("{}", style("Filter output").bold());
    println!("  Admitted: {}", style(filtered.admitted.len()).green());
    println!("  Rejected: {}", style(filtered.rejected.len()).red());
    if !filtered.rejected.is_empty() {
        println!();
        print_rejections(&filtered.rejected);
    }

    let confirmed = args.yes
        || Confirm::new()
            .with_prompt("Approve this filter output?")
            .default(false)
            .interact()?;

    if !confirmed {
        println!("Not approved. Adjust the filter config and re-run `cardmap run --overwrite`.");
        return Ok(());
    }

    orchestrator.mark_approved()?;
    println!(
        "{} Re-run {} to continue the pipeline.",
        style("Approved.").green().bold(),
        style("cardmap run").cyan()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardmap_core::types::CardCandidate;

    #[test]
    fn reason_keys_are_distinct() {
        let reasons = [
            RejectReason::DisallowedTerm {
                term: "x".to_string(),
            },
            RejectReason::DomainExclusion {
                term: "x".to_string(),
            },
            RejectReason::MissingImage,
            RejectReason::UnreadableImage {
                message: "bad".to_string(),
            },
            RejectReason::EmptyKeyword,
        ];
        let keys: std::collections::BTreeSet<&str> = reasons.iter().map(reason_key).collect();
        assert_eq!(keys.len(), reasons.len());
    }

    #[test]
    fn print_rejections_handles_empty_and_grouped() {
        // Smoke test: grouping must not panic on any mix of reasons.
        let card = CardCandidate {
            id: "card_a".to_string(),
            keyword: "ow".to_string(),
            image: PathBuf::from("a.png"),
            topic: None,
        };
        let rejected = vec![
            RejectedCard {
                card: card.clone(),
                reason: RejectReason::MissingImage,
            },
            RejectedCard {
                card,
                reason: RejectReason::EmptyKeyword,
            },
        ];
        print_rejections(&rejected);
        print_rejections(&[]);
    }
}
