//! Built-in pages used when no custom 404/500 view is configured.

use crate::error::Error;

const HTML_FOOTER: &str = "</pre>\n<hr/>\n<p>keel</p>\n</body>\n</html>\n";

/// Placeholder page for an unmatched route; embeds the requested path
#[must_use]
pub fn not_found_page(uri: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>404 Not Found</title></head>\n<body>\n\
         <h1>404 Not Found</h1>\n<p>No route for <code>{}</code></p>\n<hr/>\n<p>keel</p>\n\
         </body>\n</html>\n",
        escape_html(uri)
    )
}

/// Minimal error document with the error type, message and trace
#[must_use]
pub fn error_page(err: &Error) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>500 Internal Server Error</title></head>\n\
         <body>\n<h1>500 Internal Server Error</h1>\n<pre>{} : {}\r\n{}{HTML_FOOTER}",
        escape_html(&err.type_name()),
        escape_html(&err.to_string()),
        escape_html(&err.trace()),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_page_contains_path() {
        let page = not_found_page("/hello");
        assert!(page.contains("/hello"));
        assert!(page.contains("404"));
    }

    #[test]
    fn test_not_found_page_escapes_markup() {
        let page = not_found_page("/<script>");
        assert!(page.contains("/&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_error_page_has_type_message_and_trace() {
        let page = error_page(&Error::message("database is gone"));
        assert!(page.contains("keel_core::error::Error : database is gone"));
        assert!(page.contains("<pre>"));
    }
}
