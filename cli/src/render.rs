//! Plain-text output for the terminal. Everything here is pure so it can be
//! snapshot-tested.

use std::fmt::Write as _;

use kiln_engine::{BuildEvent, BuildFailure, Image, PlannedStep};

const STEP_NAME_WIDTH: usize = 20;

fn step_line(out: &mut String, number: usize, name: &str, text: &str) {
    let _ = writeln!(out, "{number:>3}. {name:<STEP_NAME_WIDTH$}  {text}");
}

#[must_use]
pub fn plan(image: &str, steps: &[PlannedStep]) -> String {
    let mut out = format!("image {image}\n");
    for planned in steps {
        step_line(
            &mut out,
            planned.step.number(),
            planned.step.name(),
            &planned.summary,
        );
    }
    out
}

/// One progress line per event, or `None` for events that print nothing.
#[must_use]
pub fn event(event: &BuildEvent) -> Option<String> {
    let mut out = String::new();
    match event {
        BuildEvent::Started {
            image,
            context,
            backend,
        } => {
            let _ = write!(
                out,
                "building {image} from {} ({backend} backend)",
                context.display()
            );
        }
        BuildEvent::StepStarted { .. } => return None,
        BuildEvent::StepFinished { step, detail } => {
            step_line(&mut out, step.number(), step.name(), detail);
            out.pop();
        }
        BuildEvent::StepFailed { step, .. } => {
            step_line(&mut out, step.number(), step.name(), "FAILED");
            out.pop();
        }
        BuildEvent::Committed { image, path } => {
            let _ = write!(out, "committed {image} at {}", path.display());
        }
    }
    Some(out)
}

#[must_use]
pub fn failure(failure: &BuildFailure) -> String {
    let mut out = format!("error: {failure}");
    if !failure.completed.is_empty() {
        let done: Vec<&str> = failure.completed.iter().map(|s| s.name()).collect();
        let _ = write!(out, "\ncompleted: {}", done.join(", "));
    }
    out.push_str("\nno image was produced");
    out
}

#[must_use]
pub fn image_list(images: &[Image]) -> String {
    if images.is_empty() {
        return "no images\n".to_string();
    }
    let width = images
        .iter()
        .map(|i| i.name().len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!("{:<width$}  {:<16}  {:>4}  CREATED\n", "NAME", "RUNTIME", "DEPS");
    for image in images {
        let record = &image.record;
        let _ = writeln!(
            out,
            "{:<width$}  {:<16}  {:>4}  {}",
            record.name,
            record.runtime.to_string(),
            record.dependencies.len(),
            record.created_at
        );
    }
    out
}
