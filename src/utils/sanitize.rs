//! Filename sanitization utilities

/// Turn an arbitrary id into a single safe path component
///
/// Filesystem-unsafe characters become visually similar Unicode
/// alternatives. Ids that would resolve to `.`/`..` or nothing are prefixed
/// so they can never escape the directory they are joined onto.
///
/// # Examples
///
/// ```
/// use offtune::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("tr-1/2"), "tr-1⧸2");
/// assert_eq!(sanitize_filename(".."), "_..");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' => '⧸',  // U+29F8 - Big Solidus
            '\\' => '⧹', // U+29F9 - Big Reverse Solidus
            ':' => '꞉',  // U+A789 - Modifier Letter Colon
            '*' => '⁎',  // U+204E - Low Asterisk
            '?' => '？', // U+FF1F - Fullwidth Question Mark
            '"' => '″',  // U+2033 - Double Prime
            '<' => '‹',  // U+2039 - Single Left Angle Quote
            '>' => '›',  // U+203A - Single Right Angle Quote
            '|' => '｜', // U+FF5C - Fullwidth Vertical Line
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}
