use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
}

/// Parse a `user:pass,user2:pass2` credential list. Entries without a colon
/// are skipped.
pub fn parse_users(raw: &str) -> Vec<User> {
    raw.split(',')
        .filter_map(|pair| {
            let (username, password) = pair.split_once(':')?;
            Some(User {
                username: username.trim().to_string(),
                password: password.trim().to_string(),
            })
        })
        .collect()
}

pub fn validate_user(users: &[User], username: &str, password: &str) -> bool {
    users
        .iter()
        .any(|user| user.username == username && user.password == password)
}

/// Basic-auth style token for the remembered login session.
pub fn encode_credentials(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{username}:{password}"))
}

pub fn decode_credentials(token: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
