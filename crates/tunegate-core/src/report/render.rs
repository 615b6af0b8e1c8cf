use crate::TOOL_NAME;
use crate::report::model::Report;

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {}\n", TOOL_NAME, report.tool.version));
    out.push_str(&format!(
        "File: {} ({} bytes, {} {})\n",
        report.file.name, report.file.size_bytes, report.file.hash_algorithm, report.file.hash
    ));
    if let Some(format) = &report.file.format {
        out.push_str(&format!("Format: {format}\n"));
    }

    let Some(decision) = &report.decision else {
        out.push_str(&format!("Rejected: {}\n", report.processing.status));
        if let Some(reason) = &report.processing.reason {
            out.push_str(&format!("Reason: {reason}\n"));
        }
        if !report.accepted_formats.is_empty() {
            out.push_str("Accepted formats:\n");
            for f in &report.accepted_formats {
                out.push_str(&format!(
                    "  .{:<5} {} (min {} bytes)\n",
                    f.extension, f.description, f.min_size_bytes
                ));
            }
        }
        return out;
    };

    out.push_str(&format!(
        "Decision: {} (tier {})\n",
        decision.outcome.to_uppercase(),
        decision.trust_tier
    ));
    if let Some(reason) = &decision.reason {
        out.push_str(&format!("Reason: {reason}\n"));
    }
    out.push_str(&format!(
        "Score: {:.1}  Confidence: {:.2}  Extraction: {}\n",
        decision.score, decision.confidence, decision.extraction_status
    ));
    if let Some(notes) = &decision.reasoning_notes {
        out.push_str(&format!("Reasoning: {notes}\n"));
    }

    out.push_str("Tables:\n");
    for t in &report.tables {
        let shape = match t.load_bins {
            Some(load) => format!("{}x{}", t.rpm_bins, load),
            None => format!("{}", t.rpm_bins),
        };
        out.push_str(&format!(
            "  - {} '{}' {} {} (confidence {:.2})\n",
            t.kind.as_str(),
            t.name,
            shape,
            t.unit.symbol(),
            t.confidence
        ));
    }

    out.push_str("Findings:\n");
    for f in &report.findings {
        out.push_str(&format!("  - {} [{}] {}\n", f.rule_id, f.severity, f.rationale));
    }
    out
}
