use lookout_core::{FaceObservation, Presenter};
use serde::Serialize;
use std::io::Write;

/// Console output for recognition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Compact per-face record; the embedding is left out.
#[derive(Debug, Serialize)]
pub struct FaceRecord<'a> {
    pub label: Option<&'a str>,
    pub confidence: f32,
    pub distance: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl<'a> From<&'a FaceObservation> for FaceRecord<'a> {
    fn from(obs: &'a FaceObservation) -> Self {
        Self {
            label: obs.result.label.as_deref(),
            confidence: obs.result.confidence,
            distance: obs.result.distance,
            x: obs.bbox.x,
            y: obs.bbox.y,
            width: obs.bbox.width,
            height: obs.bbox.height,
        }
    }
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    frame: u64,
    faces: Vec<FaceRecord<'a>>,
}

/// "alice (87.5%)" for a match, "unknown" otherwise.
pub fn describe(obs: &FaceObservation) -> String {
    match &obs.result.label {
        Some(label) => format!("{label} ({:.1}%)", obs.result.confidence * 100.0),
        None => "unknown".to_string(),
    }
}

/// Text mode prints a line only when the set of recognized people changes,
/// so carried frames between detection passes stay quiet. JSON mode writes
/// every frame so consumers can follow faces as they move.
pub struct ConsolePresenter<W: Write> {
    out: W,
    mode: OutputMode,
    last: Option<Vec<Option<String>>>,
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W, mode: OutputMode) -> Self {
        Self {
            out,
            mode,
            last: None,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn write_frame(&mut self, frame_index: u64, observations: &[FaceObservation]) -> std::io::Result<()> {
        match self.mode {
            OutputMode::Json => {
                let record = FrameRecord {
                    frame: frame_index,
                    faces: observations.iter().map(FaceRecord::from).collect(),
                };
                let line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
                writeln!(self.out, "{line}")
            }
            OutputMode::Text if observations.is_empty() => {
                writeln!(self.out, "[frame {frame_index}] no faces")
            }
            OutputMode::Text => {
                let faces: Vec<String> = observations.iter().map(describe).collect();
                writeln!(self.out, "[frame {frame_index}] {}", faces.join(", "))
            }
        }
    }
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn present(&mut self, frame_index: u64, observations: &[FaceObservation]) {
        if self.mode == OutputMode::Text {
            let mut labels: Vec<Option<String>> =
                observations.iter().map(|o| o.result.label.clone()).collect();
            labels.sort();
            if self.last.as_ref() == Some(&labels) {
                return;
            }
            self.last = Some(labels);
        }

        if let Err(e) = self.write_frame(frame_index, observations).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write recognition output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{BoundingBox, Embedding, MatchResult};

    fn obs(label: Option<&str>, confidence: f32) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox {
                x: 1.0, y: 2.0, width: 30.0, height: 40.0, confidence: 0.99, landmarks: None,
            },
            embedding: Embedding::new(vec![0.0; 4]),
            result: match label {
                Some(l) => MatchResult {
                    label: Some(l.to_string()),
                    distance: 1.0 - confidence,
                    confidence,
                    is_match: true,
                },
                None => MatchResult::unknown(0.9),
            },
        }
    }

    fn output(p: ConsolePresenter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(p.into_inner())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&obs(Some("alice"), 0.875)), "alice (87.5%)");
        assert_eq!(describe(&obs(None, 0.0)), "unknown");
    }

    #[test]
    fn test_text_prints_only_changes() {
        let mut p = ConsolePresenter::new(Vec::new(), OutputMode::Text);
        p.present(0, &[obs(Some("alice"), 0.8)]);
        p.present(1, &[obs(Some("alice"), 0.7)]);
        p.present(2, &[obs(Some("alice"), 0.8), obs(None, 0.0)]);
        p.present(3, &[]);
        assert_eq!(
            output(p),
            vec![
                "[frame 0] alice (80.0%)",
                "[frame 2] alice (80.0%), unknown",
                "[frame 3] no faces",
            ]
        );
    }

    #[test]
    fn test_face_order_does_not_count_as_change() {
        let mut p = ConsolePresenter::new(Vec::new(), OutputMode::Text);
        p.present(0, &[obs(Some("bob"), 0.8), obs(Some("alice"), 0.8)]);
        p.present(1, &[obs(Some("alice"), 0.8), obs(Some("bob"), 0.8)]);
        assert_eq!(output(p).len(), 1);
    }

    #[test]
    fn test_json_lines() {
        let mut p = ConsolePresenter::new(Vec::new(), OutputMode::Json);
        p.present(4, &[obs(Some("alice"), 0.5)]);
        let lines = output(p);
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["frame"], 4);
        assert_eq!(value["faces"][0]["label"], "alice");
        assert_eq!(value["faces"][0]["width"], 30.0);
        assert!(value["faces"][0].get("embedding").is_none());
    }

    #[test]
    fn test_json_reports_every_frame() {
        let mut p = ConsolePresenter::new(Vec::new(), OutputMode::Json);
        let mut moved = obs(Some("alice"), 0.8);
        p.present(0, &[obs(Some("alice"), 0.8)]);
        moved.bbox.x = 50.0;
        p.present(1, &[moved]);
        p.present(2, &[]);

        let lines = output(p);
        assert_eq!(lines.len(), 3);
        let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second["frame"], 1);
        assert_eq!(second["faces"][0]["x"], 50.0);
    }
}
