//! Fixed category -> subcategory taxonomy shared by listing creation,
//! editing, and filtering. The map is closed: categories and subcategories
//! outside it are rejected at validation time.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Pseudo-category meaning "no category restriction" when filtering.
pub const ALL_CATEGORIES: &str = "All";

pub static TAXONOMY: Lazy<BTreeMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    BTreeMap::from([
        (
            "Freelancers",
            &[
                "Graphic Design",
                "Content Writing",
                "Web Development",
                "Photography",
                "Translation",
            ][..],
        ),
        (
            "Students",
            &["Tutoring", "Research", "Note Taking", "Exam Prep"][..],
        ),
        (
            "Professionals",
            &[
                "Business Consulting",
                "Legal Advice",
                "Medical Services",
                "Accounting",
            ][..],
        ),
        (
            "HomeServices",
            &["Repairs", "Cleaning", "Plumbing", "Electrical", "Gardening"][..],
        ),
    ])
});

pub fn subcategories_of(category: &str) -> Option<&'static [&'static str]> {
    TAXONOMY.get(category).copied()
}

/// Validate a category + subcategory selection for create/update. Returns a
/// field-level message on failure so the caller can build a ValidationError.
pub fn validate_selection(category: &str, subcategories: &[String]) -> Result<(), String> {
    let Some(allowed) = subcategories_of(category) else {
        return Err(format!("unknown category '{category}'"));
    };
    for sub in subcategories {
        if !allowed.contains(&sub.as_str()) {
            return Err(format!(
                "subcategory '{sub}' is not part of category '{category}'"
            ));
        }
    }
    Ok(())
}

/// Filter-side check: a plain category filter only needs the category to
/// exist (or be the `All` sentinel); requested subcategories may span
/// categories when filtering all of them.
pub fn is_known_category(category: &str) -> bool {
    category == ALL_CATEGORIES || TAXONOMY.contains_key(category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_accepts_known_pairs() {
        assert!(validate_selection("Students", &["Tutoring".into(), "Research".into()]).is_ok());
        assert!(validate_selection("HomeServices", &[]).is_ok());
    }

    #[test]
    fn selection_rejects_foreign_subcategory() {
        let err = validate_selection("Students", &["Plumbing".into()]).unwrap_err();
        assert!(err.contains("Plumbing"));
    }

    #[test]
    fn selection_rejects_unknown_category() {
        assert!(validate_selection("Pets", &[]).is_err());
        assert!(!is_known_category("Pets"));
        assert!(is_known_category(ALL_CATEGORIES));
    }
}
