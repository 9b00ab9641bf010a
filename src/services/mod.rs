pub mod builder;
pub mod cache;
pub mod fetcher;
pub mod grouping;
pub mod locale;
pub mod m3u_transformer;
pub mod metrics;
pub mod rewriter;
pub mod warmup;

#[cfg(test)]
pub mod test_support;
