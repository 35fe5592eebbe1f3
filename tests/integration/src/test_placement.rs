//! Placement round trips: presign, record, retrieve, delete.

#[cfg(test)]
mod tests {
    use crate::{base_url, client, test_key};

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_place_and_retrieve_object_metadata() {
        let key = test_key("roundtrip");

        let upload: serde_json::Value = client()
            .post(format!("{}/api/v1/presign/upload", base_url()))
            .json(&serde_json::json!({
                "key": key,
                "size": 1024,
                "content_type": "application/octet-stream",
            }))
            .send()
            .await
            .expect("presign upload request")
            .json()
            .await
            .expect("presign upload body");
        assert_eq!(upload["method"], "PUT");
        assert!(upload["url"].as_str().unwrap().contains("X-Amz-Signature="));
        let placed_on = upload["bucket_name"].as_str().unwrap().to_owned();

        let info: serde_json::Value = client()
            .get(format!("{}/api/v1/objects/{key}", base_url()))
            .send()
            .await
            .expect("object info request")
            .json()
            .await
            .expect("object info body");
        assert_eq!(info["bucket_name"], placed_on.as_str());
        assert_eq!(info["size"], 1024);

        let download: serde_json::Value = client()
            .post(format!("{}/api/v1/presign/download", base_url()))
            .json(&serde_json::json!({ "key": key }))
            .send()
            .await
            .expect("presign download request")
            .json()
            .await
            .expect("presign download body");
        assert_eq!(download["method"], "GET");
        assert_eq!(download["bucket_name"], placed_on.as_str());

        let deleted = client()
            .delete(format!("{}/api/v1/objects/{key}", base_url()))
            .send()
            .await
            .expect("delete request");
        assert_eq!(deleted.status(), 200);

        let gone = client()
            .get(format!("{}/api/v1/objects/{key}", base_url()))
            .send()
            .await
            .expect("object info request");
        assert_eq!(gone.status(), 404);
    }

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_reject_oversized_placement() {
        let response = client()
            .post(format!("{}/api/v1/presign/upload", base_url()))
            .json(&serde_json::json!({
                "key": test_key("oversized"),
                // No sane test backend has an exabyte free.
                "size": 1u64 << 60,
            }))
            .send()
            .await
            .expect("presign upload request");
        assert_eq!(response.status(), 503);

        let body: serde_json::Value = response.json().await.expect("error body");
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    #[ignore = "requires running gateway"]
    async fn test_should_list_recorded_placements() {
        let key = test_key("listing");
        client()
            .post(format!("{}/api/v1/presign/upload", base_url()))
            .json(&serde_json::json!({ "key": key, "size": 1 }))
            .send()
            .await
            .expect("presign upload request");

        let listing: serde_json::Value = client()
            .get(format!(
                "{}/api/v1/objects?prefix=integration%2Flisting%2F&limit=100",
                base_url()
            ))
            .send()
            .await
            .expect("list request")
            .json()
            .await
            .expect("list body");
        let keys: Vec<&str> = listing["objects"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|o| o["key"].as_str())
            .collect();
        assert!(keys.contains(&key.as_str()));

        client()
            .delete(format!("{}/api/v1/objects/{key}", base_url()))
            .send()
            .await
            .expect("cleanup delete");
    }
}
