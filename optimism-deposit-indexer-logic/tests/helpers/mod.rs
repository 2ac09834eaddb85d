pub mod eth_mock_server;
