//! End-to-end tests: ABI file -> decoded record -> delivery queue -> Telegram API (mocked)

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use alloy::primitives::{address, Address, Bytes, LogData, U256};
    use alloy::rpc::types::Log as RpcLog;
    use backoff::ExponentialBackoffBuilder;
    use mockito::Matcher;

    use contract_events_notifier::abi::ContractAbi;
    use contract_events_notifier::notifier::{render_message, DeliveryQueue, RetryPolicy, TelegramNotifier};
    use contract_events_notifier::server;
    use contract_events_notifier::subscriptions::EventSource;
    use contract_events_notifier::types::EventRecord;

    const CONTRACT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
    const TRANSFER_ABI: &str = r#"[
        {
            "type": "event",
            "name": "Transfer",
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        }
    ]"#;

    fn contract() -> ContractAbi {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TRANSFER_ABI.as_bytes()).unwrap();
        ContractAbi::load(CONTRACT.parse().unwrap(), file.path()).unwrap()
    }

    fn transfer_log(contract: &ContractAbi, block_number: u64, value: u64) -> RpcLog {
        let selector = contract.abi.event("Transfer").unwrap()[0].selector();
        let from = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let to = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let data = Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec());

        RpcLog {
            inner: alloy::primitives::Log {
                address: contract.address,
                data: LogData::new_unchecked(vec![selector, from.into_word(), to.into_word()], data),
            },
            block_number: Some(block_number),
            log_index: Some(0),
            transaction_index: Some(0),
            ..Default::default()
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy { max_retries: 0, base_delay: Duration::from_millis(1) }
    }

    async fn wait_until_matched(mocks: &[&mockito::Mock]) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let mut all = true;
            for mock in mocks {
                all &= mock.matched_async().await;
            }
            if all || tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_transfer_scenario_rendering() {
        let contract = contract();
        let record = EventRecord::from_log(&contract.decoder(), &transfer_log(&contract, 19_000_000, 100));
        let text = render_message(CONTRACT, &record).unwrap();

        assert!(text.contains("Transfer"));
        assert!(text.contains(CONTRACT));
        assert!(text.contains("100"));
        let from = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let to = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert!(text.contains(&from.to_checksum(None)));
        assert!(text.contains("0xaAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa"));
        assert!(text.contains(&to.to_checksum(None)));
    }

    #[test]
    fn test_unknown_event_forwarded_raw() {
        let contract = contract();
        let mut log = transfer_log(&contract, 5, 1);
        log.inner.data = LogData::new_unchecked(vec![alloy::primitives::B256::repeat_byte(0x42)], Bytes::new());

        let record = EventRecord::from_log(&contract.decoder(), &log);
        assert_eq!(record.event, None);
        assert_eq!(record.event_name(), "<unknown>");
        assert_eq!(record.raw.topics, vec![format!("0x{}", "42".repeat(32))]);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_next_event() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", "/bottoken/sendMessage")
            .match_body(Matcher::Regex("111111".to_string()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let delivered = server
            .mock("POST", "/bottoken/sendMessage")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("222222".to_string()),
                Matcher::PartialJson(serde_json::json!({"chat_id": "777"})),
            ]))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":9}}"#)
            .expect(1)
            .create_async()
            .await;

        let contract = contract();
        let decoder = contract.decoder();
        let notifier = Arc::new(TelegramNotifier::new(&server.url(), "token", "777", CONTRACT).unwrap());
        let (queue, _worker) = DeliveryQueue::spawn(notifier, policy(), 4);

        queue.enqueue(EventRecord::from_log(&decoder, &transfer_log(&contract, 111111, 5))).await.unwrap();
        queue.enqueue(EventRecord::from_log(&decoder, &transfer_log(&contract, 222222, 6))).await.unwrap();

        wait_until_matched(&[&rejected, &delivered]).await;
        rejected.assert_async().await;
        delivered.assert_async().await;
    }

    #[tokio::test]
    async fn test_liveness_survives_subscription_errors() {
        let telegram = mockito::Server::new_async().await;
        let notifier = Arc::new(TelegramNotifier::new(&telegram.url(), "token", "1", CONTRACT).unwrap());
        let (queue, _worker) = DeliveryQueue::spawn(notifier, policy(), 4);

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(50))
            .with_max_elapsed_time(None)
            .build();
        // Nothing listens on port 9, every connection attempt fails
        let source = EventSource::new("ws://127.0.0.1:9".to_string(), &contract(), queue, backoff);
        let source_handle = tokio::spawn(source.run());

        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = reserved.local_addr().unwrap();
        drop(reserved);
        tokio::spawn(server::serve(addr));

        let client = reqwest::Client::new();
        let mut last_status = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Ok(response) = client.get(format!("http://{}/", addr)).send().await {
                last_status = Some(response.status().as_u16());
                assert_eq!(response.text().await.unwrap(), server::LIVENESS_BODY);
                break;
            }
        }

        assert_eq!(last_status, Some(200));
        assert!(!source_handle.is_finished());
        source_handle.abort();
    }

    #[test]
    fn test_contract_address_kept_from_config() {
        let contract = contract();
        let expected: Address = CONTRACT.parse().unwrap();
        assert_eq!(contract.address, expected);
    }
}
