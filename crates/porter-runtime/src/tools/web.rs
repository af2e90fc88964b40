//! Web tools: Brave search and URL fetch with HTML-to-text extraction.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use porter_core::{Result, Tool, ToolContext};
use regex::Regex;
use serde_json::{json, Value};

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(api_key: String, max_results: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            max_results: max_results.clamp(1, 10),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "Search the web using Brave Search API"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "count": { "type": "integer", "minimum": 1, "maximum": 10 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        if self.api_key.is_empty() {
            return Ok("Error: BRAVE_API_KEY not configured".to_string());
        }

        let query = args["query"].as_str().unwrap_or_default();
        let count = args["count"]
            .as_u64()
            .map(|c| c as usize)
            .unwrap_or(self.max_results)
            .clamp(1, 10);

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Ok(format!("Error: HTTP {} - {body}", status.as_u16()));
        }

        let data: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => return Ok(format!("Error parsing search response: {e}")),
        };
        let results = data["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No results for: {query}"));
        }

        let mut out = format!("Results for: {query}\n\n");
        for (i, item) in results.iter().take(count).enumerate() {
            out.push_str(&format!(
                "{}. {}\n   {}\n",
                i + 1,
                item["title"].as_str().unwrap_or(""),
                item["url"].as_str().unwrap_or(""),
            ));
            if let Some(desc) = item["description"].as_str().filter(|d| !d.is_empty()) {
                out.push_str(&format!("   {desc}\n"));
            }
        }
        Ok(out.trim().to_string())
    }
}

pub struct WebFetchTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new(50_000)
    }
}

impl WebFetchTool {
    pub fn new(max_chars: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_chars,
        }
    }
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.chars().take(512).collect::<String>().to_lowercase();
    head.contains("<html") || head.contains("<!doctype")
}

pub(crate) fn html_to_text(html: &str) -> String {
    struct Res {
        script: Regex,
        style: Regex,
        br: Regex,
        blocks: Regex,
        tags: Regex,
        spaces: Regex,
        newlines: Regex,
    }
    static RES: OnceLock<Option<Res>> = OnceLock::new();
    let Some(res) = RES
        .get_or_init(|| {
            Some(Res {
                script: Regex::new(r"(?is)<script[\s\S]*?</script>").ok()?,
                style: Regex::new(r"(?is)<style[\s\S]*?</style>").ok()?,
                br: Regex::new(r"(?i)<br\s*/?>").ok()?,
                blocks: Regex::new(r"(?i)</(p|div|section|article|h1|h2|h3|h4|h5|h6)>").ok()?,
                tags: Regex::new(r"<[^>]+>").ok()?,
                spaces: Regex::new(r"[ \t]+").ok()?,
                newlines: Regex::new(r"\n{3,}").ok()?,
            })
        })
        .as_ref()
    else {
        return html.to_string();
    };

    let text = res.script.replace_all(html, "");
    let text = res.style.replace_all(&text, "");
    let text = res.br.replace_all(&text, "\n");
    let text = res.blocks.replace_all(&text, "\n\n");
    let text = res.tags.replace_all(&text, "");
    let text = res.spaces.replace_all(&text, " ");
    let text = res.newlines.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }
    fn description(&self) -> &str {
        "Fetch URL and extract readable text"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "maxChars": { "type": "integer", "minimum": 100 }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let url = args["url"].as_str().unwrap_or_default();
        let max_chars = args["maxChars"]
            .as_u64()
            .map(|c| c as usize)
            .unwrap_or(self.max_chars)
            .max(100);

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(json!({ "error": "Only http/https URLs allowed", "url": url }).to_string());
        }

        let resp = self
            .client
            .get(url)
            .header("Accept", "*/*")
            .timeout(Duration::from_secs(30))
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Ok(json!({ "error": e.to_string(), "url": url }).to_string()),
        };

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Ok(json!({ "error": format!("HTTP {status}"), "url": url }).to_string());
        }

        let (mut text, extractor) = if looks_like_html(&body) {
            (html_to_text(&body), "html_text")
        } else {
            (body, "raw")
        };

        let mut truncated = false;
        if text.len() > max_chars {
            let mut cut = max_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            truncated = true;
        }

        Ok(json!({
            "url": url,
            "finalUrl": final_url,
            "status": status,
            "extractor": extractor,
            "truncated": truncated,
            "length": text.len(),
            "text": text,
        })
        .to_string())
    }
}
