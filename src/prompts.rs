// prompts.rs — Instruction text for the two capabilities. No I/O.

use crate::ai::Ingestion;
use crate::session::{ChatTurn, Role};

/// Stands in for the report inside a chat prompt when there is none.
pub const NO_ANALYSIS_PLACEHOLDER: &str = "No analysis has been performed yet.";

/// What the user is told when they ask a question before any analysis.
pub const NO_ANALYSIS_REPLY: &str = "No analysis has been performed yet, so there is no report to answer from. \
Upload a video and at least one reference image, then run an analysis first.";

const ONLY_REPORT_DIRECTIVE: &str = "IMPORTANT: ONLY OUTPUT THE REPORT TEXT. \
DO NOT INCLUDE ANY INTRODUCTORY OR CONCLUDING REMARKS OUTSIDE OF THE REPORT STRUCTURE.";

/// Sectioned report, used when the backend watches the whole video.
const REPORT_TEMPLATE: &str = "\
You are an expert manufacturing process inspector. Analyze the manufacturing process shown in the video \
and compare it against the reference images, which show the standard operating procedure (SOP).
Identify safety hazards, quality control issues, process inefficiencies and deviations from the SOP. \
Be detailed, objective and actionable, and give timestamps for every observation.

Structure your analysis as follows:

## Manufacturing Process Analysis Report

### Executive Summary
[Brief overview of key findings and overall assessment.]
- **Overall Compliance Score:** [X/100]

### 1. Safety Compliance
- **Observation [Timestamp/Frame]:** [Safety observation, e.g. missing PPE, unguarded machinery.]
  - **Severity:** [Low/Medium/High/Critical]
  - **Potential Impact:** [Consequence if not addressed.]
  - **Recommended Action:** [Specific corrective action.]

### 2. Process Compliance (vs. Reference Images)
- **Observation [Timestamp/Frame]:** [Process deviation, e.g. wrong tool, skipped step, out of sequence.]
  - **Deviation Type:** [Sequence error, Tooling error, Material handling, ...]
  - **Reference Discrepancy:** [How it differs from the reference SOP.]
  - **Recommended Action:** [Specific corrective action.]

### 3. Quality Control
- **Observation [Timestamp/Frame]:** [Quality issue, e.g. visible defect, misaligned component.]
  - **Severity:** [Minor/Moderate/Major/Critical]
  - **Potential Impact:** [Rework, scrap, customer return, ...]
  - **Recommended Action:** [Quality improvement measure.]

### 4. Efficiency and Optimization
- **Observation [Timestamp/Frame]:** [Idle time, unnecessary movement, bottleneck, ...]
  - **Area for Improvement:** [Time, Material, Ergonomics, ...]
  - **Recommended Action:** [Optimization strategy.]

### 5. Overall Recommendations
[Prioritized list of actionable improvements.]
";

/// Frame-by-frame comparison, used when the backend only sees stills.
const COMPARISON_TEMPLATE: &str = "\
You are an expert manufacturing quality inspector comparing video frames against \
Standard Operating Procedure (SOP) reference images.

Method:
1. Study the reference SOP images to understand the correct procedure.
2. Walk through the video frames in chronological order.
3. Compare each frame against the references and note every deviation.
4. Cite the frame number and timestamp for every observation.

## Manufacturing Process Analysis Report

### Executive Summary
- **Overall Compliance Score:** [X/100]
- **Critical Issues Found:** [Number]
- **Process Adherence:** [Percentage]

### 1. Safety Compliance
- **Frame #[X] at [timestamp]:** [Safety issue]
  - **Reference Standard:** [What the SOP shows]
  - **Risk Level:** [Critical/High/Medium/Low]
  - **Immediate Action:** [Specific safety correction]

### 2. Process Compliance (vs. Reference Images)
- **Frame #[X] at [timestamp]:** [What is happening]
  - **Reference Comparison:** [How it differs from the SOP]
  - **Deviation Severity:** [Critical/High/Medium/Low]
  - **Expected vs. Actual:** [What should happen vs. what happens]

### 3. Quality Control
- **Frame #[X] at [timestamp]:** [Quality issue]
  - **SOP Standard:** [Quality standard from the reference]
  - **Corrective Action:** [Specific improvement]

### 4. Efficiency and Optimization
- **Frame #[X] at [timestamp]:** [Inefficiency]
  - **Standard Method:** [Efficient method from the SOP]
  - **Optimization:** [Specific improvement]

### 5. Overall Recommendations
1. **IMMEDIATE (Critical):** [Fix within 24 hours]
2. **SHORT-TERM (High):** [Address within 1 week]
3. **MEDIUM-TERM (Medium):** [Improve within 1 month]

### Compliance Checklist
- PASS/FAIL **PPE Usage**
- PASS/FAIL **Tool Positioning**
- PASS/FAIL **Sequence Adherence**
- PASS/FAIL **Quality Checks**
- PASS/FAIL **Safety Protocols**
";

/// Instructions for a first, structured analysis.
pub fn analysis_prompt(
    ingestion: Ingestion,
    interval_secs: u32,
    frame_count: usize,
    reference_names: &[&str],
) -> String {
    let template = match ingestion {
        Ingestion::WholeMedia => REPORT_TEMPLATE,
        Ingestion::FrameSequence => COMPARISON_TEMPLATE,
    };

    let mut prompt = String::from(template);
    prompt.push('\n');
    match ingestion {
        Ingestion::WholeMedia => prompt.push_str(&format!(
            "The full video is attached. Stills were sampled every {interval_secs} seconds ({frame_count} frames) for reference.\n"
        )),
        Ingestion::FrameSequence => prompt.push_str(&format!(
            "{frame_count} video frames follow, sampled every {interval_secs} seconds.\n"
        )),
    }
    if !reference_names.is_empty() {
        prompt.push_str(&format!(
            "Reference images provided: {}.\n",
            reference_names.join(", ")
        ));
    }
    prompt.push('\n');
    prompt.push_str(ONLY_REPORT_DIRECTIVE);
    prompt
}

/// Instructions for a follow-up question about the current report.
pub fn chat_prompt(report: Option<&str>, history: &[ChatTurn], question: &str) -> String {
    let report = report
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(NO_ANALYSIS_PLACEHOLDER);
    let history = format_history(history);
    let history = if history.is_empty() {
        "(no previous messages)".to_string()
    } else {
        history
    };

    format!(
        "You are an AI assistant specializing in manufacturing processes. You have performed a detailed \
analysis of a manufacturing video; the report is provided below. Answer follow-up questions based on it. \
If the user asks for a new analysis, tell them to upload new files and run a new analysis.

---
PREVIOUS MANUFACTURING ANALYSIS REPORT:
{report}
---

CONVERSATION CONTEXT:
{history}

USER QUESTION: {question}

Answer the question using the report and the conversation. If the report does not contain the answer, \
say that you do not have enough information and ask the user for clarification or more context. \
Be concise and helpful."
    )
}

/// `User: …` / `Assistant: …`, one turn per line.
pub fn format_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| {
            let who = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{who}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
