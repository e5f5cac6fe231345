//! Fixed prompt text.
//!
//! The output-format contract below is the whole interface between the
//! generation provider and the deck validator. It is reproduced verbatim in
//! every generation prompt, and the closing instructions repeat its key
//! points. Tests pin the header lines so a prompt edit cannot silently drift
//! from [`crate::deck::HEADER_LINES`].

/// Verbatim output format section of every generation prompt.
pub const OUTPUT_FORMAT_CONTRACT: &str = r#"# Output Format Requirements

Generate a tab-separated text file that starts with these exact four header lines:
```
#separator:tab
#html:true
#tags column:3
Front	Back	Tags
```

Each flashcard row must have exactly three columns separated by a single TAB character:
- **Front**: The question (use <br> for line breaks, not \n)
- **Back**: The answer with explanation (use <br> for line breaks, not \n)
- **Tags**: Space-separated tags (e.g., "core-topics methods")

# Formatting Guidelines

1. **MathJax**: Use `\(...\)` for inline math, `\[...\]` for display math
2. **HTML**: Use `<strong>` for emphasis, `<br>` for line breaks, `<ul>` and `<li>` for lists
3. **Images**: Reference images as `<img src="../images/FILENAME.png" style="max-width:500px;">`
   - Place images in the FRONT (question), not the BACK (answer)
   - The question should ask about the diagram
   - The answer explains without repeating the image
4. **No tabs in content**: Use spaces or `<br>` instead of tab characters
5. **One card per line**: Never break a card across lines"#;

/// Closing instructions, repeating the contract for emphasis.
pub const FINAL_INSTRUCTIONS: &str = r#"IMPORTANT:
- Output ONLY the deck document: no explanatory text before or after the flashcards
- Do not wrap the output in code fences
- Start directly with the four header lines shown above
- Use actual TAB characters to separate the three columns (not spaces)
- Each card must be on a single line (use <br> for line breaks within fields)"#;

/// Description prompt for one lecture image.
///
/// With page context the model is asked to relate the image to the page;
/// without it a generic classification prompt is used.
pub fn image_description_prompt(
    page_number: Option<u32>,
    page_context: Option<&str>,
    subject_context: &str,
) -> String {
    match page_context.filter(|c| !c.trim().is_empty()) {
        Some(context) => {
            let excerpt: String = context.chars().take(300).collect();
            let page = page_number
                .map(|p| p.to_string())
                .unwrap_or_else(|| "N".to_string());
            format!(
                "This image appears on page {page} of {subject_context}.\n\n\
Page context: {excerpt}\n\n\
Describe this image in 50-100 words, focusing on how it illustrates the concepts \
from this page. Include the image type and key visual elements."
            )
        }
        None => {
            let page_info = page_number
                .map(|p| format!(" (page {p})"))
                .unwrap_or_default();
            format!(
                "Describe this image from {subject_context}{page_info} in 50-100 words.\n\n\
Include:\n\
- Type (diagram, network architecture, algorithm, graph, formula, or table)\n\
- Main concept shown\n\
- Key visual elements\n\n\
Be concise and technical."
            )
        }
    }
}
