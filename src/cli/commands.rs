use futures::future::join_all;

use crate::app::{AppContext, Result};
use crate::store::CacheStore;

pub async fn preview(ctx: &AppContext, urls: &[String]) -> Result<()> {
    let previews = join_all(urls.iter().map(|url| ctx.service.get_preview(url))).await;

    let json = match previews.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    println!("{}", json);
    Ok(())
}

pub async fn read(ctx: &AppContext, url: &str, text_only: bool) -> Result<()> {
    let article = ctx.service.get_reader_content(url).await;

    if text_only {
        if !article.status.is_success() {
            eprintln!(
                "{}: {}",
                article.status.as_str(),
                article.error.as_deref().unwrap_or("no content")
            );
        }
        println!("{}", article.title);
        println!();
        println!("{}", article.text_content);
        for download in &article.downloads {
            match &download.password {
                Some(password) => println!("[{}] {} (password: {})", download.provider, download.href, password),
                None => println!("[{}] {}", download.provider, download.href),
            }
        }
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&article)?);
    Ok(())
}

pub fn purge_cache(ctx: &AppContext) -> Result<()> {
    let removed = ctx.service.cache().purge_expired();
    println!("Removed {} expired entries", removed);
    Ok(())
}

pub fn cache_stats(ctx: &AppContext) -> Result<()> {
    let count = ctx.store.count_entries()?;
    println!("{} cached results (ttl {} days)", count, ctx.config.cache.ttl_days);
    Ok(())
}
