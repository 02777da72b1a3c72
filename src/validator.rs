//! Pure grammar checks on directive/report text. No I/O, no knowledge
//! of the reducer or store; a validator failure just means "treat this
//! artifact as absent" to callers.

/// Validates a report: requires `# STATUS` followed by one of
/// COMPLETED|FAILED|BLOCKED, a `## CHANGES` section, a
/// `## VERIFICATION` section whose body is non-trivial (>= 10 chars,
/// no `TODO`), and no unresolved `[COMPLETED | FAILED | BLOCKED]`
/// placeholder.
pub fn validate_report(text: &str) -> Result<(), String> {
    if text.contains("[COMPLETED | FAILED | BLOCKED]") {
        return Err("report status placeholder was not filled in".to_string());
    }

    let status_line = find_header_value(text, "# STATUS")
        .ok_or_else(|| "report is missing a `# STATUS` header".to_string())?;
    if !matches!(status_line.as_str(), "COMPLETED" | "FAILED" | "BLOCKED") {
        return Err(format!(
            "`# STATUS` must be COMPLETED, FAILED, or BLOCKED, got `{status_line}`"
        ));
    }

    if find_section(text, "## CHANGES").is_none() {
        return Err("report is missing a `## CHANGES` section".to_string());
    }

    let verification = find_section(text, "## VERIFICATION")
        .ok_or_else(|| "report is missing a `## VERIFICATION` section".to_string())?;
    let trimmed = verification.trim();
    if trimmed.len() < 10 {
        return Err("`## VERIFICATION` section is too short to be meaningful".to_string());
    }
    if trimmed.contains("TODO") {
        return Err("`## VERIFICATION` section still contains TODO".to_string());
    }

    Ok(())
}

/// Validates a directive: requires a `# DIRECTIVE` header, a
/// `## EXECUTE` or `## CRITIQUE` section, a VERDICT section with
/// APPROVE|REJECT, and no unresolved `[APPROVE | REJECT]` placeholder.
pub fn validate_directive(text: &str) -> Result<(), String> {
    if text.contains("[APPROVE | REJECT]") {
        return Err("directive verdict placeholder was not filled in".to_string());
    }

    if !has_header(text, "# DIRECTIVE") {
        return Err("directive is missing a `# DIRECTIVE` header".to_string());
    }

    if find_section(text, "## EXECUTE").is_none() && find_section(text, "## CRITIQUE").is_none() {
        return Err("directive is missing a `## EXECUTE` or `## CRITIQUE` section".to_string());
    }

    let verdict = find_header_value(text, "# VERDICT")
        .ok_or_else(|| "directive is missing a `# VERDICT` header".to_string())?;
    if !matches!(verdict.as_str(), "APPROVE" | "REJECT") {
        return Err(format!(
            "`# VERDICT` must be APPROVE or REJECT, got `{verdict}`"
        ));
    }

    Ok(())
}

/// Returns whether the verdict line of an already-validated directive
/// is APPROVE. Callers should run `validate_directive` first.
pub fn directive_is_approve(text: &str) -> bool {
    find_header_value(text, "# VERDICT").as_deref() == Some("APPROVE")
}

fn has_header(text: &str, header: &str) -> bool {
    text.lines().any(|line| line.trim() == header)
}

/// Returns the trimmed text on the line(s) immediately following a
/// `# HEADER` line, up to the next blank line or header.
fn find_header_value(text: &str, header: &str) -> Option<String> {
    let mut lines = text.lines();
    for line in lines.by_ref() {
        if line.trim() == header {
            break;
        }
    }
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            return None;
        }
        return Some(trimmed.to_string());
    }
    None
}

/// Returns the body text between a `## SECTION` heading and the next
/// heading (or end of text).
fn find_section(text: &str, heading: &str) -> Option<String> {
    let mut lines = text.lines();
    let mut found = false;
    for line in lines.by_ref() {
        if line.trim() == heading {
            found = true;
            break;
        }
    }
    if !found {
        return None;
    }
    let mut body = String::new();
    for line in lines {
        if line.trim_start().starts_with('#') {
            break;
        }
        body.push_str(line);
        body.push('\n');
    }
    Some(body)
}
