use feedmail_mail::OutgoingEmail;
use feedmail_types::Feed;

use crate::fetcher::FeedItem;

/// Plain-text notification for one new item. The recipient's locale is
/// unknown here, so the text is English.
pub fn render_item_email(feed: &Feed, recipient: &str, item: &FeedItem) -> OutgoingEmail {
    let source = if feed.name.is_empty() { &feed.url } else { &feed.name };
    let subject = format!("New post on {}: {}", source, item.title);

    let mut body = subject.clone();
    body.push_str("\nURL: ");
    body.push_str(item.link.as_deref().unwrap_or(&feed.url));
    body.push('\n');
    if !item.links.is_empty() {
        body.push_str("Additional Links:\n");
        for (num, link) in item.links.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", num + 1, link));
        }
    }
    body.push_str("\n\n");
    body.push_str(&item.content);

    OutgoingEmail {
        to: recipient.to_string(),
        subject,
        body,
    }
}
