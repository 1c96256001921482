//! Standard form-field mapping
//!
//! Maps a form label (case-insensitive substring match) onto the user data
//! that should fill it. Specific patterns are checked before generic ones so
//! "first name" never falls through to the full name, and "username" is never
//! treated as a name field.

use crate::messages::UserData;

/// Value for a standard field label, if the label is recognized and the user
/// has the data
pub fn value_for_label(label: &str, user: &UserData) -> Option<String> {
    let label = label.to_lowercase();
    let has = |needle: &str| label.contains(needle);

    if has("first name") {
        return user.first();
    }
    if has("last name") {
        return user.last();
    }
    if has("email") {
        return Some(user.email.clone());
    }
    if has("phone") {
        return Some(user.phone.clone());
    }
    if has("linkedin") {
        return user.linkedin_url.clone();
    }
    if has("github") {
        return user.github_url.clone();
    }
    if has("portfolio") || has("website") {
        return user.portfolio_url.clone().or_else(|| user.website.clone());
    }
    if has("address") || has("street") {
        return user.address.clone();
    }
    if has("city") {
        return user.city.clone();
    }
    if has("state") || has("region") {
        return user.state.clone();
    }
    if has("zip") || has("postal") {
        return user.zip_code.clone();
    }
    if has("country") {
        return user.country.clone();
    }
    // Generic name check last; "username" is a login field, not a name
    if (has("full name") || has("name")) && !has("user") {
        return Some(user.name.clone());
    }

    None
}

/// Whether an upload-field label wants the résumé (as opposed to the cover
/// letter)
pub fn upload_wants_resume(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("resume") || label.contains("résumé") || label.contains("cv")
}

pub fn upload_wants_cover_letter(label: &str) -> bool {
    label.to_lowercase().contains("cover")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserData {
        UserData {
            name: "Dana Q Smith".to_string(),
            email: "dana@example.com".to_string(),
            phone: "+15551230000".to_string(),
            linkedin_url: Some("https://linkedin.com/in/dana".to_string()),
            github_url: Some("https://github.com/dana".to_string()),
            website: Some("https://dana.example.com".to_string()),
            address: Some("1 Main St".to_string()),
            city: Some("Austin".to_string()),
            state: Some("TX".to_string()),
            zip_code: Some("78701".to_string()),
            country: Some("USA".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_fields() {
        let user = user();
        assert_eq!(value_for_label("Full Name", &user).as_deref(), Some("Dana Q Smith"));
        assert_eq!(value_for_label("Name *", &user).as_deref(), Some("Dana Q Smith"));
        assert_eq!(value_for_label("First Name", &user).as_deref(), Some("Dana"));
        assert_eq!(value_for_label("Last Name", &user).as_deref(), Some("Smith"));
    }

    #[test]
    fn test_username_is_not_a_name() {
        assert_eq!(value_for_label("Username", &user()), None);
    }

    #[test]
    fn test_contact_fields() {
        let user = user();
        assert_eq!(
            value_for_label("Email Address", &user).as_deref(),
            Some("dana@example.com")
        );
        assert_eq!(
            value_for_label("Phone number", &user).as_deref(),
            Some("+15551230000")
        );
    }

    #[test]
    fn test_address_block() {
        let user = user();
        assert_eq!(value_for_label("Street address", &user).as_deref(), Some("1 Main St"));
        assert_eq!(value_for_label("City", &user).as_deref(), Some("Austin"));
        assert_eq!(value_for_label("State / Region", &user).as_deref(), Some("TX"));
        assert_eq!(value_for_label("ZIP code", &user).as_deref(), Some("78701"));
        assert_eq!(value_for_label("Postal Code", &user).as_deref(), Some("78701"));
    }

    #[test]
    fn test_links() {
        let user = user();
        assert_eq!(
            value_for_label("LinkedIn profile", &user).as_deref(),
            Some("https://linkedin.com/in/dana")
        );
        assert_eq!(
            value_for_label("GitHub", &user).as_deref(),
            Some("https://github.com/dana")
        );
        // portfolio_url is unset; website is the fallback
        assert_eq!(
            value_for_label("Portfolio or website", &user).as_deref(),
            Some("https://dana.example.com")
        );
    }

    #[test]
    fn test_unknown_or_missing_data() {
        let user = user();
        assert_eq!(value_for_label("Favorite color", &user), None);

        let sparse = UserData {
            name: "Dana".to_string(),
            email: "d@example.com".to_string(),
            phone: "+1555".to_string(),
            ..Default::default()
        };
        assert_eq!(value_for_label("City", &sparse), None);
        assert_eq!(value_for_label("LinkedIn", &sparse), None);
    }

    #[test]
    fn test_upload_classification() {
        assert!(upload_wants_resume("Resume/CV"));
        assert!(upload_wants_resume("Upload your résumé"));
        assert!(!upload_wants_resume("Cover letter"));
        assert!(upload_wants_cover_letter("Cover Letter (optional)"));
        assert!(!upload_wants_cover_letter("Resume"));
    }
}
