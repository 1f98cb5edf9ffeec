//! Context assembler (component H). A pure async builder: inputs
//! `(session_id, page)`, output `(prose, images)`. Sections are assembled in
//! a fixed order and omitted when empty.

use crate::model::{AnswerKeyRow, ContextRepository, ProblemRow};
use tutor_domain::error::Result;
use tutor_sessions::SessionSnapshot;

/// One titled section, used by the structured preview endpoint.
#[derive(Debug, Clone)]
pub struct ContextSection {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOutput {
    pub prose: String,
    pub images: Vec<Vec<u8>>,
}

/// Build the full prompt context for a reasoning or voice-question call.
pub async fn build_context(
    repo: &dyn ContextRepository,
    session: &SessionSnapshot,
    page: i32,
    erase_snapshots: &[String],
) -> Result<ContextOutput> {
    let mut images = Vec::new();
    let sections = build_sections(repo, session, page, erase_snapshots, &mut images).await?;

    let prose = sections
        .into_iter()
        .map(|s| format!("## {}\n{}", s.title, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(ContextOutput { prose, images })
}

/// Build the same sections as a title/content list, for the admin preview
/// endpoint. Never calls the LLM.
pub async fn build_context_structured(
    repo: &dyn ContextRepository,
    session: &SessionSnapshot,
    page: i32,
    erase_snapshots: &[String],
) -> Result<Vec<ContextSection>> {
    let mut images = Vec::new();
    build_sections(repo, session, page, erase_snapshots, &mut images).await
}

async fn build_sections(
    repo: &dyn ContextRepository,
    session: &SessionSnapshot,
    page: i32,
    erase_snapshots: &[String],
    images: &mut Vec<Vec<u8>>,
) -> Result<Vec<ContextSection>> {
    let mut sections = Vec::new();

    // 1. Student's current work.
    if let Some(row) = repo.get_page_transcription(&session.session_id, page).await? {
        let header = match &session.active_part {
            Some(part) => format!("Student's Current Work (Part {part})"),
            None => "Student's Current Work".to_string(),
        };
        let content = if row.text.trim().is_empty() {
            if let Some(image) = repo.render_page_image(&session.session_id, page).await? {
                images.push(image);
                "The student's work is attached as an image (diagram or unrecognized handwriting)."
                    .to_string()
            } else {
                String::new()
            }
        } else {
            row.text.clone()
        };
        if !content.is_empty() {
            sections.push(ContextSection {
                title: header,
                content,
            });
        }
    }

    // 2. Previously erased work.
    if !erase_snapshots.is_empty() {
        let content = erase_snapshots
            .iter()
            .rev()
            .enumerate()
            .map(|(i, text)| format!("{}. {}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(ContextSection {
            title: "Previously Erased Work".to_string(),
            content,
        });
    }

    // 3. Original problem (live registry -> cached question -> none).
    let resolved = match (&session.document_ref, session.question_number) {
        (Some(doc), Some(q)) => Some((doc.clone(), q)),
        _ => repo.get_cached_question(&session.session_id).await?,
    };

    let problem = if let Some((doc_ref, question_number)) = &resolved {
        repo.get_problem(doc_ref, *question_number).await?
    } else {
        None
    };

    if let Some(problem) = &problem {
        sections.push(ContextSection {
            title: "Original Problem".to_string(),
            content: render_problem(problem, session.active_part.as_deref()),
        });
    }

    if let Some((doc_ref, question_number)) = &resolved {
        // 4. Answer key, scoped the same way as problem parts.
        let keys = repo.get_answer_key(doc_ref, *question_number).await?;
        if let Some(section) = render_answer_key(&keys, session.active_part.as_deref()) {
            sections.push(section);
        }

        // 5. Question figures.
        let figures = repo.get_question_figures(doc_ref, *question_number).await?;
        images.extend(figures);
    }

    // 6. Recent tutor history.
    let history = repo
        .get_recent_reasoning_logs(&session.session_id, page, 5)
        .await?;
    if !history.is_empty() {
        let content = history
            .iter()
            .map(|entry| {
                let tag = match entry.source.as_deref() {
                    Some("voice_question") => "[voice answer]",
                    _ if entry.is_error_flag => "[error flag]",
                    _ => "[note]",
                };
                format!("{tag} {}", entry.message)
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(ContextSection {
            title: "Recent Tutor History".to_string(),
            content,
        });

        // 7. Anti-repetition guard.
        if let Some(last) = history.last() {
            if last.is_error_flag {
                sections.push(ContextSection {
                    title: "Do Not Repeat Yourself".to_string(),
                    content: format!(
                        "You previously flagged an error: \"{}\"\nYour reasoning at the time was: \"{}\"\nCheck whether this has since been fixed before repeating it.",
                        last.message, last.internal_reasoning
                    ),
                });
            }
        }
    }

    Ok(sections)
}

fn render_problem(problem: &ProblemRow, active_part: Option<&str>) -> String {
    let mut out = String::new();
    if !problem.stem.is_empty() {
        out.push_str(&problem.stem);
        out.push('\n');
    }
    for part in &problem.parts {
        if let Some(active) = active_part {
            if part.label.as_str() > active {
                continue;
            }
        }
        if Some(part.label.as_str()) == active_part {
            out.push_str(&format!(
                "({}) {} [currently working on this part]\n",
                part.label, part.text
            ));
        } else {
            out.push_str(&format!("({}) {}\n", part.label, part.text));
        }
    }
    out.trim_end().to_string()
}

fn render_answer_key(keys: &[AnswerKeyRow], active_part: Option<&str>) -> Option<ContextSection> {
    if keys.is_empty() {
        return None;
    }

    let Some(active) = active_part else {
        let content = keys
            .iter()
            .map(|k| {
                if k.part_label.is_empty() {
                    k.answer.clone()
                } else {
                    format!("({}) {}", k.part_label, k.answer)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Some(ContextSection {
            title: "Answer Key".to_string(),
            content,
        });
    };

    let current: Vec<&AnswerKeyRow> = keys.iter().filter(|k| k.part_label == active).collect();
    let previous: Vec<&AnswerKeyRow> = keys
        .iter()
        .filter(|k| !k.part_label.is_empty() && k.part_label.as_str() < active)
        .collect();

    let mut content = String::new();
    for k in &current {
        content.push_str(&k.answer);
        content.push('\n');
    }
    if !previous.is_empty() {
        content.push_str("\nPrevious Parts\n");
        for k in &previous {
            content.push_str(&format!("({}) {}\n", k.part_label, k.answer));
        }
    }

    Some(ContextSection {
        title: format!("Answer Key (Part {active})"),
        content: content.trim_end().to_string(),
    })
}
