//! Tracking pixel and click-through link rewriting injected into a
//! personalized message body. Serving the pixel/redirect endpoints these
//! URLs point at is out of scope for this service; this module only
//! prepares the HTML a recipient receives.

use linkify::LinkFinder;
use linkify::LinkKind;
use uuid::Uuid;

/// 1x1 open-tracking pixel appended to the rendered body. `fingerprint`
/// lets the (external) open-tracking endpoint attribute the open without a
/// join back to the campaign/email pair.
pub fn tracking_pixel_tag(
    base_url: &str,
    campaign_id: Uuid,
    fingerprint: &str,
) -> String {
    format!(r#"<img src="{base_url}/t/open/{campaign_id}/{fingerprint}.gif" width="1" height="1" alt="" style="display:none" />"#)
}

/// Rewrites every `http(s)` link found in `html` to route through the
/// click-tracking redirect, carrying the original destination as a query
/// param so the (external) redirect handler knows where to send the
/// recipient on from there.
pub fn rewrite_links(
    html: &str,
    base_url: &str,
    campaign_id: Uuid,
    fingerprint: &str,
) -> String {
    let finder = LinkFinder::new();
    let mut out = String::with_capacity(html.len());
    let mut last_end = 0;
    for link in finder.links(html) {
        if *link.kind() != LinkKind::Url {
            continue;
        }
        out.push_str(&html[last_end..link.start()]);
        out.push_str(&format!(
            "{base_url}/t/click/{campaign_id}/{fingerprint}?url={}",
            urlencoding::encode(link.as_str())
        ));
        last_end = link.end();
    }
    out.push_str(&html[last_end..]);
    out
}
