//! Turns configuration into the shared provider set.

use std::sync::Arc;

use quill_agent::Providers;
use quill_observability::ActivityLog;
use quill_tools::http::build_client;
use quill_tools::{
    AnalyticsFetcher, DuckDuckGoSearch, EmbeddingTool, GeminiClient, GeminiEmbedding, LinkedInAnalytics,
    LinkedInClient, LlmTool, MockAnalytics, MockSocialClient, MultiAnalyticsFetcher, MultiSocialClient,
    NewsApiSearch, NewsDataSearch, Resilient, SearchTool, SocialClient, ToolError, TwitterAnalytics, TwitterClient,
};

use crate::config::ProviderSection;

const LINKEDIN: &str = "linkedin";
const TWITTER_ALIASES: [&str; 2] = ["twitter", "x"];

/// Build every capability as a primary/backup pair.
///
/// - search: NewsAPI or NewsData (by key prefix), backed by DuckDuckGo;
///   DuckDuckGo alone without a key
/// - llm and embedding: Gemini
/// - social and analytics: every platform with credentials (LinkedIn, X);
///   the offline publisher and fixed analytics when none are configured
///
/// With `use_mock` the fully offline set is returned.
pub fn build_providers(settings: &ProviderSection, activity: Arc<dyn ActivityLog>) -> Result<Providers, ToolError> {
    if settings.use_mock {
        tracing::info!("using offline providers");
        return Ok(Providers::mock());
    }

    let http = build_client(settings.http_timeout())?;
    let gemini_key = settings
        .gemini_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ToolError::config("gemini api key is not set"))?;

    let web: Arc<dyn SearchTool> = Arc::new(DuckDuckGoSearch::new().with_client(http.clone()));
    let search: Arc<dyn SearchTool> = match non_empty(&settings.news_api_key) {
        Some(key) => {
            let primary: Arc<dyn SearchTool> = if NewsDataSearch::accepts_key(&key) {
                Arc::new(NewsDataSearch::new(key).with_client(http.clone()))
            } else {
                Arc::new(NewsApiSearch::new(key).with_client(http.clone()))
            };
            Arc::new(pair("search", primary, Some(web), settings, &activity))
        }
        None => {
            tracing::warn!("news api key not set, searching DuckDuckGo only");
            web
        }
    };

    let mut gemini = GeminiClient::new(gemini_key.clone()).with_client(http.clone());
    if let Some(model) = non_empty(&settings.gemini_model) {
        gemini = gemini.with_model(model);
    }
    tracing::debug!(model = %gemini.model(), "gemini generation model");
    let embedder = GeminiEmbedding::new(gemini_key).with_client(http.clone());

    let llm: Arc<dyn LlmTool> = Arc::new(pair("llm", Arc::new(gemini) as Arc<dyn LlmTool>, None, settings, &activity));
    let embedding: Arc<dyn EmbeddingTool> = Arc::new(pair(
        "embedding",
        Arc::new(embedder) as Arc<dyn EmbeddingTool>,
        None,
        settings,
        &activity,
    ));

    let mut router = MultiSocialClient::new();
    let mut fetchers = MultiAnalyticsFetcher::new();
    if let (Some(token), Some(urn)) = (non_empty(&settings.linkedin_access_token), non_empty(&settings.linkedin_author_urn)) {
        let linkedin = LinkedInClient::new(token, urn).with_client(http.clone());
        fetchers = fetchers.with_fetcher(LINKEDIN, Arc::new(LinkedInAnalytics::new(linkedin.clone())));
        router.add_client(LINKEDIN, Arc::new(linkedin));
    }
    if let Some(token) = non_empty(&settings.twitter_access_token) {
        let twitter = TwitterClient::new(token).with_client(http.clone());
        for alias in TWITTER_ALIASES {
            fetchers = fetchers.with_fetcher(alias, Arc::new(TwitterAnalytics::new(twitter.clone())));
            router.add_client(alias, Arc::new(twitter.clone()));
        }
    }

    let social: Arc<dyn SocialClient>;
    let analytics: Arc<dyn AnalyticsFetcher>;
    if router.is_empty() {
        tracing::warn!("no social credentials configured, posts go to the offline publisher");
        social = Arc::new(MockSocialClient::new("mock"));
        analytics = Arc::new(MockAnalytics::default());
    } else {
        tracing::info!(platforms = ?router.platforms().collect::<Vec<_>>(), "social clients configured");
        let router: Arc<dyn SocialClient> = Arc::new(router);
        let fetchers: Arc<dyn AnalyticsFetcher> = Arc::new(fetchers);
        social = Arc::new(pair("social", router, None, settings, &activity));
        analytics = Arc::new(pair("analytics", fetchers, None, settings, &activity));
    }

    Ok(Providers {
        search,
        llm,
        embedding,
        social,
        analytics,
    })
}

fn pair<T: ?Sized + Send + Sync>(
    capability: &str,
    primary: Arc<T>,
    backup: Option<Arc<T>>,
    settings: &ProviderSection,
    activity: &Arc<dyn ActivityLog>,
) -> Resilient<T> {
    let resilient = Resilient::new(capability, primary)
        .with_optional_backup(backup)
        .with_activity(Arc::clone(activity));
    match settings.attempt_timeout() {
        Some(timeout) => resilient.with_attempt_timeout(timeout),
        None => resilient,
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
