//! Health and bucket-view endpoints.

#[cfg(test)]
mod tests {
    use crate::{base_url, client};

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_report_healthy() {
        let response = client()
            .get(format!("{}/health", base_url()))
            .send()
            .await
            .expect("health request");
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.expect("health body");
        assert_eq!(body["status"], "healthy");
        assert!(body["time"].as_i64().is_some());
    }

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_list_buckets_with_strategy() {
        let response = client()
            .get(format!("{}/api/v1/buckets", base_url()))
            .send()
            .await
            .expect("bucket list request");
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.expect("bucket list body");
        assert!(body["strategy"].as_str().is_some());
        let buckets = body["buckets"].as_array().expect("buckets array");
        for bucket in buckets {
            assert!(bucket["name"].as_str().is_some());
            assert!(bucket["max_size_bytes"].as_u64().is_some());
        }
    }

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_expose_single_bucket_stats() {
        let listing: serde_json::Value = client()
            .get(format!("{}/api/v1/buckets", base_url()))
            .send()
            .await
            .expect("bucket list request")
            .json()
            .await
            .expect("bucket list body");
        let name = listing["buckets"][0]["name"]
            .as_str()
            .expect("at least one configured bucket");

        let response = client()
            .get(format!("{}/api/v1/buckets/{name}/stats", base_url()))
            .send()
            .await
            .expect("stats request");
        assert_eq!(response.status(), 200);

        let stats: serde_json::Value = response.json().await.expect("stats body");
        assert_eq!(stats["name"], name);
        assert!(stats["operations"]["write"].as_u64().is_some());
    }

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_404_unknown_bucket_stats() {
        let response = client()
            .get(format!("{}/api/v1/buckets/no-such-bucket/stats", base_url()))
            .send()
            .await
            .expect("stats request");
        assert_eq!(response.status(), 404);
    }
}
