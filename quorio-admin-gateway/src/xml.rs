//! XML bodies of the admin surface: error documents and heal listings.

use chrono::{DateTime, Utc};
use quorio_core::{BucketInfo, ListObjectsInfo};

const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Echoed listing parameters of a list-objects-heal request.
#[derive(Debug, Clone, Copy)]
pub struct ListingParams<'a> {
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub marker: &'a str,
    pub delimiter: &'a str,
    pub max_keys: usize,
}

pub fn error_document(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
</Error>"#,
        xml_escape(code),
        xml_escape(message)
    )
}

/// `ListAllMyBucketsResult` over the buckets needing heal.
pub fn list_buckets_heal_result(buckets: &[BucketInfo]) -> String {
    let mut entries = String::new();
    for bucket in buckets {
        entries.push_str(&format!(
            "\n        <Bucket>\n            <Name>{}</Name>\n            <CreationDate>{}</CreationDate>\n        </Bucket>",
            xml_escape(&bucket.name),
            timestamp(&bucket.created)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="{}">
    <Owner>
        <ID>quorio</ID>
        <DisplayName>quorio</DisplayName>
    </Owner>
    <Buckets>{}
    </Buckets>
</ListAllMyBucketsResult>"#,
        S3_NAMESPACE, entries
    )
}

/// `ListBucketResult` over the objects needing heal.
pub fn list_objects_heal_result(params: ListingParams<'_>, listing: &ListObjectsInfo) -> String {
    let mut body = String::new();
    body.push_str(&format!("\n    <Name>{}</Name>", xml_escape(params.bucket)));
    body.push_str(&format!("\n    <Prefix>{}</Prefix>", xml_escape(params.prefix)));
    body.push_str(&format!("\n    <Marker>{}</Marker>", xml_escape(params.marker)));
    if let Some(next_marker) = listing.next_marker.as_deref().filter(|_| listing.is_truncated) {
        body.push_str(&format!("\n    <NextMarker>{}</NextMarker>", xml_escape(next_marker)));
    }
    body.push_str(&format!("\n    <MaxKeys>{}</MaxKeys>", params.max_keys));
    if !params.delimiter.is_empty() {
        body.push_str(&format!(
            "\n    <Delimiter>{}</Delimiter>",
            xml_escape(params.delimiter)
        ));
    }
    body.push_str(&format!("\n    <IsTruncated>{}</IsTruncated>", listing.is_truncated));

    for object in &listing.objects {
        body.push_str(&format!(
            r#"
    <Contents>
        <Key>{}</Key>
        <LastModified>{}</LastModified>
        <ETag>"{}"</ETag>
        <Size>{}</Size>
        <StorageClass>STANDARD</StorageClass>
    </Contents>"#,
            xml_escape(&object.name),
            timestamp(&object.mod_time),
            xml_escape(&object.etag),
            object.size
        ));
    }

    for prefix in &listing.prefixes {
        body.push_str(&format!(
            "\n    <CommonPrefixes>\n        <Prefix>{}</Prefix>\n    </CommonPrefixes>",
            xml_escape(prefix)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="{}">{}
</ListBucketResult>"#,
        S3_NAMESPACE, body
    )
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Escape special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
