/// Derive a URL slug from a post title: lowercase, fold accented letters to
/// their ASCII base, collapse every other run of characters to a single
/// hyphen, trim hyphens at both ends.
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());

    for c in title.to_lowercase().chars() {
        let folded = fold_diacritic(c);
        match folded {
            'a'..='z' | '0'..='9' => out.push(folded),
            _ => {
                if !out.ends_with('-') && !out.is_empty() {
                    out.push('-');
                }
            }
        }
    }

    out.trim_matches('-').to_string()
}

#[must_use]
pub fn with_suffix(slug: &str, n: u32) -> String {
    format!("{slug}-{n}")
}

/// ASCII folding for the accented letters that show up in French titles.
const fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'æ' => 'e',
        'œ' => 'e',
        _ => c,
    }
}
