//! HTML rendering of placed blocks
//!
//! Every rendered instance becomes a wrapper element keyed by its unique id.
//! The wrapper holds the viewer container and a JSON script tag with the
//! instance's settings, which the viewer reads when it attaches.

use cadview_core::RenderedBlock;
use serde::Serialize;

const PAGE_STYLE: &str = "\
.cad-render-block-wrapper { margin: 0 0 1.5rem; }
.cad-render-block-container { width: 100%; height: 400px; position: relative; }
.cad-render-block-container canvas { display: block; }
";

/// Blocks of one page region, in display order
#[derive(Debug, Clone)]
pub struct PageSection {
    pub region: String,
    pub blocks: Vec<RenderedBlock>,
}

/// Escape text for use in HTML content and quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Serialize a value as JSON that is safe inside a `<script>` element
pub fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(json
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}

/// Markup of one rendered block
pub fn render_block(block: &RenderedBlock) -> Result<String, serde_json::Error> {
    let mut html = format!(
        "<div class=\"cad-render-block-wrapper\" data-unique-id=\"{}\">\n",
        escape_html(&block.unique_id)
    );
    if let Some(label) = &block.label {
        html.push_str(&format!(
            "  <h2 class=\"cad-render-block-title\">{}</h2>\n",
            escape_html(label)
        ));
    }
    html.push_str("  <div class=\"cad-render-block-container\"></div>\n");
    html.push_str(&format!(
        "  <script type=\"application/json\" class=\"cad-render-settings\">{}</script>\n",
        script_json(&block.settings)?
    ));
    html.push_str("</div>\n");
    Ok(html)
}

/// Full HTML document with the viewer bootstrap.
///
/// The decoder script is a classic script so its module factory is a
/// global by the time the viewer meets a compressed model.
pub fn render_page(
    title: &str,
    sections: &[PageSection],
    viewer_script: &str,
    decoder_script: &str,
) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for section in sections {
        body.push_str(&format!(
            "<section class=\"region region-{}\">\n",
            escape_html(&section.region)
        ));
        for block in &section.blocks {
            body.push_str(&render_block(block)?);
        }
        body.push_str("</section>\n");
    }

    Ok(format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
<meta charset=\"utf-8\">
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">
<title>{title}</title>
<style>
{PAGE_STYLE}</style>
</head>
<body>
{body}<script src=\"{decoder}\"></script>
<script type=\"module\">
import init, {{ attach_behaviors }} from {script};
await init();
attach_behaviors();
</script>
</body>
</html>
",
        title = escape_html(title),
        decoder = escape_html(decoder_script),
        script = script_json(viewer_script)?,
    ))
}
