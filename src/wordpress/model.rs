use serde::Deserialize;

/// The part of a created post we need back.
#[derive(Deserialize, Debug)]
pub struct CreatedPost {
    pub id: i64,
}

/// WordPress REST error envelope (`{"code": "...", "message": "..."}`).
#[derive(Deserialize, Debug, Default)]
pub struct WpErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
