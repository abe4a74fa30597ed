//! Terminal rendering of run summaries and statistics reports.

use colored::Colorize;

use tutorloops_core::RunSummary;
use tutorloops_stats::{Descriptive, Estimate, StatisticsReport};

pub fn print_summary(summary: &RunSummary) {
    eprintln!();
    if summary.interrupted {
        eprintln!("{}", "=== INTERRUPTED ===".yellow().bold());
    } else {
        eprintln!("{}", "=== RUN COMPLETE ===".green().bold());
    }
    eprintln!("{}  {}", "Run:".dimmed(), summary.run_id);
    eprintln!(
        "{}  {} completed, {} failed ({} cancelled) of {}",
        "Cells:".dimmed(),
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.total
    );
    for (kind, count) in &summary.failures_by_kind {
        eprintln!("  {:<12} {}", kind.to_string(), count);
    }
    eprintln!(
        "{}  {}",
        "Duration:".dimmed(),
        format_duration(summary.duration_secs)
    );
}

pub fn print_report(report: &StatisticsReport) {
    println!("{}", "=== Statistics ===".bright_blue().bold());
    println!("{}  {}", "Rubric:".dimmed(), report.rubric_version);
    println!(
        "{}  {} analysed, {} failed, {} excluded of {}",
        "Cells:".dimmed(),
        report.counts.analysed,
        report.counts.failed,
        report.counts.excluded.len(),
        report.counts.total
    );
    println!("{}  {}", "Overall:".dimmed(), describe(&report.overall));

    section("By profile");
    for (profile, stats) in &report.by_profile {
        println!("  {:<24} {}", profile, describe(stats));
    }

    for factor in &report.by_factor {
        section(&format!("By {}", factor.factor));
        for level in &factor.levels {
            println!("  {:<24} {}", level.level, describe(&level.stats));
        }
    }

    section("By architecture");
    for (architecture, stats) in &report.by_architecture {
        println!("  {:<24} {}", architecture, describe(stats));
    }

    section("Dimensions");
    for (name, summary) in &report.dimensions {
        println!("  {:<24} {}", name, describe(&summary.overall));
    }

    if !report.effects.is_empty() {
        section("Effect sizes (Cohen's d)");
        for comparison in &report.effects {
            let label = format!(
                "{}: {} vs {}",
                comparison.factor, comparison.treatment, comparison.control
            );
            match &comparison.effect {
                Estimate::Computed(e) => println!(
                    "  {:<36} d = {:>6.2} ({})",
                    label,
                    e.d,
                    e.magnitude.to_string().bold()
                ),
                other => println!("  {:<36} {}", label, other.status_label().dimmed()),
            }
        }
    }

    section("ANOVA");
    match &report.anova {
        Estimate::Computed(table) => {
            println!(
                "  {:<28} {:>10} {:>4} {:>9} {:>8} {:>6} {:>9}",
                "term", "SS", "df", "F", "p", "η²", "partial η²"
            );
            for term in &table.terms {
                match &term.stats {
                    Estimate::Computed(s) => println!(
                        "  {:<28} {:>10.2} {:>4} {:>9} {:>8} {:>6.3} {:>9.3}",
                        term.name,
                        s.ss,
                        s.df,
                        s.f.map_or("-".to_string(), |f| format!("{:.2}", f)),
                        s.p.map_or("-".to_string(), format_p),
                        s.eta_squared,
                        s.partial_eta_squared
                    ),
                    other => println!("  {:<28} {}", term.name, other.status_label().dimmed()),
                }
            }
            println!(
                "  {:<28} {:>10.2} {:>4}",
                "residual", table.residual.ss, table.residual.df
            );
        }
        other => println!("  {}", other.status_label().dimmed()),
    }

    for (factor, decomposition) in &report.decompositions {
        section(&format!("Decomposition of {}", factor));
        match decomposition {
            Estimate::Computed(d) => {
                println!("  total gain over {}: {:+.2}", d.baseline, d.total_gain);
                for step in &d.steps {
                    let share = step.share.map_or(String::new(), |s| format!(" ({:.0}%)", s));
                    println!("  {} → {}: {:+.2}{}", step.from, step.to, step.gain, share);
                }
            }
            other => println!("  {}", other.status_label().dimmed()),
        }
    }

    if !report.interactions.is_empty() {
        section("Interaction contrasts");
        for (name, contrast) in &report.interactions {
            match contrast {
                Estimate::Computed(c) => {
                    let effects: Vec<String> = c
                        .simple_effects
                        .iter()
                        .map(|e| format!("{} at {}={}: {:+.2}", c.factor, c.across, e.at, e.effect))
                        .collect();
                    println!("  {:<28} {}; contrast {:+.2}", name, effects.join(", "), c.contrast);
                }
                other => println!("  {:<28} {}", name, other.status_label().dimmed()),
            }
        }
    }

    if let Some(reliability) = &report.reliability {
        section(&format!(
            "Inter-rater reliability ({})",
            reliability.judges.join(", ")
        ));
        match &reliability.overall {
            Estimate::Computed(r) => {
                let icc = match &r.icc {
                    Estimate::Computed(icc) => format!("{:.3}", icc),
                    other => other.status_label().to_string(),
                };
                println!("  ICC(2,1) overall: {} over {} items", icc, r.items);
                for rater in &r.raters {
                    let flag = if rater.near_zero_variance {
                        " near-zero variance".red().to_string()
                    } else {
                        String::new()
                    };
                    println!(
                        "  {:<24} mean {:.2} sd {}{}",
                        rater.judge,
                        rater.mean,
                        rater.sd.map_or("-".to_string(), |sd| format!("{:.2}", sd)),
                        flag
                    );
                }
            }
            other => println!("  {}", other.status_label().dimmed()),
        }
        for (name, dimension) in &reliability.dimensions {
            if let Some(Estimate::Computed(icc)) = dimension.computed().map(|r| &r.icc) {
                println!("  {:<24} ICC {:.3}", name, icc);
            }
        }
    }

    section("Outcomes");
    for (profile, distribution) in &report.outcomes {
        let counts: Vec<String> = distribution
            .outcomes
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(outcome, n)| format!("{} {}", outcome, n))
            .collect();
        println!(
            "  {:<24} [{}] {}{}",
            profile,
            distribution.architecture,
            counts.join(", "),
            if distribution.accepted_as_is > 0 {
                format!(" ({} accepted as-is)", distribution.accepted_as_is)
            } else {
                String::new()
            }
        );
    }

    if !report.interventions.is_empty() {
        section("Critic interventions");
        for (profile, counts) in &report.interventions {
            let counts: Vec<String> = counts
                .iter()
                .map(|(kind, n)| format!("{} {}", kind, n))
                .collect();
            println!("  {:<24} {}", profile, counts.join(", "));
        }
    }

    if report.failures.total > 0 {
        section("Failures");
        for (kind, count) in &report.failures.by_kind {
            println!("  {:<12} {}", kind.to_string().red(), count);
        }
        for failure in &report.failures.failures {
            println!(
                "  {} {} ({:?}): {}",
                failure.cell.dimmed(),
                failure.kind,
                failure.stage,
                failure.reason
            );
        }
    }
}

fn section(title: &str) {
    println!();
    println!("{}", format!("{}:", title).dimmed());
}

fn describe(stats: &Estimate<Descriptive>) -> String {
    match stats {
        Estimate::Computed(d) => {
            let spread = match (d.sd, d.ci) {
                (Some(sd), Some((low, high))) => {
                    format!(" sd {:.2}, 95% CI [{:.2}, {:.2}]", sd, low, high)
                }
                _ => String::new(),
            };
            format!("n={:<4} mean {:.2}{}", d.n, d.mean, spread)
        }
        other => other.status_label().dimmed().to_string(),
    }
}

fn format_p(p: f64) -> String {
    if p < 0.001 {
        "<.001".to_string()
    } else {
        format!("{:.3}", p)
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    }
}
