use pulsebot_types::Candidate;

/// Weighted engagement over a candidate's public counters.
///
/// `(likes*0.5 + retweets*1.0 + replies*0.8 + bookmarks*0.3 + (views/1000)*0.1) / 100`
pub fn calculate_engagement_score(candidate: &Candidate) -> f64 {
    let metric = |value: Option<u64>| value.unwrap_or(0) as f64;

    let likes = metric(candidate.likes);
    let retweets = metric(candidate.retweets);
    let replies = metric(candidate.replies);
    let bookmarks = metric(candidate.bookmark_count);
    let views = metric(candidate.views);

    (likes * 0.5 + retweets * 1.0 + replies * 0.8 + bookmarks * 0.3 + (views / 1000.0) * 0.1)
        / 100.0
}
