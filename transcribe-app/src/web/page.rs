//! HTML for the single upload page.

/// Links to the artifacts of one finished job.
#[derive(Debug, Clone)]
pub struct JobLinks {
    pub audio: String,
    pub midi: String,
    pub musicxml: String,
    pub png: Option<String>,
    pub note_count: usize,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders the upload form, an optional notice and optional results.
pub fn render(notice: Option<&str>, results: Option<&JobLinks>) -> String {
    let mut body = String::new();

    if let Some(message) = notice {
        body.push_str(&format!(
            "    <p class=\"notice\">{}</p>\n",
            escape(message)
        ));
    }

    body.push_str(
        r#"    <form method="post" enctype="multipart/form-data">
      <input type="file" name="audio" accept=".wav,.mp3,.flac" required>
      <button type="submit">Transcribe</button>
    </form>
"#,
    );

    if let Some(links) = results {
        body.push_str(&format!(
            "    <h2>Results</h2>\n    <p>Detected {} notes.</p>\n    <audio controls src=\"{}\"></audio>\n    <ul>\n",
            links.note_count,
            escape(&links.audio)
        ));
        body.push_str(&format!(
            "      <li><a href=\"{}\">MIDI</a></li>\n",
            escape(&links.midi)
        ));
        body.push_str(&format!(
            "      <li><a href=\"{}\">MusicXML</a></li>\n",
            escape(&links.musicxml)
        ));
        body.push_str("    </ul>\n");
        if let Some(png) = &links.png {
            body.push_str(&format!(
                "    <img src=\"{}\" alt=\"Rendered score\">\n",
                escape(png)
            ));
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Audio to Sheet Music</title>
  </head>
  <body>
    <h1>Audio to Sheet Music</h1>
{body}  </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_only() {
        let html = render(None, None);
        assert!(html.contains(r#"name="audio""#));
        assert!(!html.contains("Results"));
        assert!(!html.contains("notice"));
    }

    #[test]
    fn test_results_links() {
        let links = JobLinks {
            audio: "/static/job-1/input.wav".to_string(),
            midi: "/static/job-1/output.mid".to_string(),
            musicxml: "/static/job-1/output.musicxml".to_string(),
            png: None,
            note_count: 3,
        };
        let html = render(None, Some(&links));
        assert!(html.contains("Detected 3 notes."));
        assert!(html.contains(r#"href="/static/job-1/output.mid""#));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn test_notice_is_escaped() {
        let html = render(Some("<b>bad</b>"), None);
        assert!(html.contains("&lt;b&gt;bad&lt;/b&gt;"));
    }
}
