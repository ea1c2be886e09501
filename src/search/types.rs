use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NewsApiResponse {
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub source: Option<ArticleSource>,
    pub published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleSource {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomSearchResponse {
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: Option<String>,
    pub display_link: Option<String>,
}

/// Error payloads of both backends: News API puts `message` at the top
/// level, Custom Search nests it under `error`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or_else(|| self.error.and_then(|e| e.message))
            .filter(|m| !m.is_empty())
    }
}
