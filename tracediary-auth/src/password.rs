/// Minimum master password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Returns why `password` fails the master password policy, if it does.
///
/// Policy: at least eight characters including a letter and a digit.
pub fn master_password_error(password: &str) -> Option<&'static str> {
    if password.is_empty() {
        return Some("Please enter a master password.");
    }
    let long_enough = password.chars().count() >= MIN_PASSWORD_LEN;
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(long_enough && has_letter && has_digit) {
        return Some("Master password needs at least 8 characters with letters and digits.");
    }
    None
}
