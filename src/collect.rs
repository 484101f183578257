//! Interactive response collection.
//!
//! Shows each pending prompt of a batch, reads the pasted model response and
//! a confidence, and saves the responses file after every answer so an
//! interrupted session can be resumed.

use crate::jsonl::write_json_pretty;
use crate::normalize::{extract_confidence, sanitize_confidence};
use crate::prompts::{PromptBatch, ResponseEntry, response_key};
use anyhow::Result;
use log::info;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

/// What a collection session did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectSummary {
    pub answered: usize,
    pub skipped: usize,
    pub completed: usize,
    pub total: usize,
    pub quit: bool,
}

enum Reply {
    Response(String),
    Skip,
    Quit,
}

pub struct Collector<R, W> {
    input: R,
    output: W,
    default_confidence: f64,
}

fn is_answered(responses: &BTreeMap<String, ResponseEntry>, key: &str) -> bool {
    responses
        .get(key)
        .is_some_and(|entry| !entry.response.trim().is_empty())
}

fn count_completed(batch: &PromptBatch, responses: &BTreeMap<String, ResponseEntry>) -> usize {
    batch
        .prompts
        .iter()
        .filter(|p| is_answered(responses, &response_key(&p.item_id, &p.run_id)))
        .count()
}

impl<R: BufRead, W: Write> Collector<R, W> {
    pub fn new(input: R, output: W, default_confidence: f64) -> Self {
        Self {
            input,
            output,
            default_confidence,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// A multi-line response ends at the first blank line or end of input
    fn read_reply(&mut self) -> Result<Reply> {
        let Some(first) = self.read_line()? else {
            return Ok(Reply::Quit);
        };
        match first.trim().to_lowercase().as_str() {
            "q" => return Ok(Reply::Quit),
            "s" | "" => return Ok(Reply::Skip),
            _ => {}
        }

        let mut lines = vec![first];
        while let Some(line) = self.read_line()? {
            if line.trim().is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(Reply::Response(lines.join("\n").trim().to_string()))
    }

    fn read_confidence(&mut self, extracted: f64) -> Result<f64> {
        writeln!(self.output, "Extracted confidence: {extracted:.2}")?;
        write!(
            self.output,
            "Press Enter to use this, or type a different value (0-1): "
        )?;
        self.output.flush()?;

        let input = self.read_line()?.unwrap_or_default();
        let input = input.trim();
        if input.is_empty() {
            return Ok(extracted);
        }
        match input.parse::<f64>().ok().and_then(|v| sanitize_confidence(v, "input")) {
            Some(value) => {
                writeln!(self.output, "Using confidence: {value:.2}")?;
                Ok(value)
            }
            None => {
                writeln!(self.output, "Invalid input, using extracted: {extracted:.2}")?;
                Ok(extracted)
            }
        }
    }

    /// Walk the pending prompts of `batch`, updating `responses` and saving
    /// them to `responses_path` after each answer
    pub fn run(
        &mut self,
        batch: &PromptBatch,
        responses: &mut BTreeMap<String, ResponseEntry>,
        responses_path: &Path,
    ) -> Result<CollectSummary> {
        let rule = "=".repeat(80);
        let total = batch.prompts.len();
        let mut summary = CollectSummary {
            total,
            completed: count_completed(batch, responses),
            ..Default::default()
        };

        writeln!(self.output, "{rule}")?;
        writeln!(self.output, "Task: {} | Model: {}", batch.task, batch.model)?;
        writeln!(self.output, "Progress: {}/{} completed", summary.completed, total)?;
        writeln!(
            self.output,
            "Paste each response followed by an empty line. 'q' quits, 's' skips."
        )?;
        writeln!(self.output, "{rule}")?;

        for (index, prompt) in batch.prompts.iter().enumerate() {
            let key = response_key(&prompt.item_id, &prompt.run_id);
            if is_answered(responses, &key) {
                continue;
            }

            writeln!(self.output, "\n{rule}")?;
            writeln!(self.output, "PROMPT {}/{}", index + 1, total)?;
            writeln!(
                self.output,
                "ID: {} | Run: {} | Expected: {}",
                prompt.item_id, prompt.run_id, prompt.expected
            )?;
            writeln!(self.output, "{rule}\n")?;
            writeln!(self.output, "{}", prompt.full_prompt)?;
            writeln!(self.output, "{}", "-".repeat(80))?;
            write!(self.output, "Response: ")?;
            self.output.flush()?;

            let text = match self.read_reply()? {
                Reply::Quit => {
                    summary.quit = true;
                    break;
                }
                Reply::Skip => {
                    summary.skipped += 1;
                    writeln!(self.output, "Skipped.")?;
                    continue;
                }
                Reply::Response(text) => text,
            };

            let extracted = extract_confidence(&text).unwrap_or(self.default_confidence);
            let confidence = self.read_confidence(extracted)?;
            let label = responses.get(&key).and_then(|entry| entry.label.clone());
            responses.insert(
                key,
                ResponseEntry {
                    response: text,
                    confidence: Some(confidence),
                    label,
                },
            );
            write_json_pretty(responses_path, &*responses)?;

            summary.answered += 1;
            summary.completed = count_completed(batch, responses);
            writeln!(self.output, "Saved. Progress: {}/{}", summary.completed, total)?;
        }

        info!(
            "Collection {}: {} answered, {} skipped, {}/{} complete",
            if summary.quit { "paused" } else { "finished" },
            summary.answered,
            summary.skipped,
            summary.completed,
            summary.total
        );
        Ok(summary)
    }
}
