use indicatif::ProgressStyle;

/// Bar used for multi-frame runs.
pub(crate) fn progress_style() -> anyhow::Result<ProgressStyle> {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-");

    Ok(style)
}
