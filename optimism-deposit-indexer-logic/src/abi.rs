use alloy::sol;

sol! {
    #[sol(rpc)]
    contract SystemConfig {
        function optimismPortal() external view returns (address);
        function startBlock() external view returns (uint256);
    }
}

sol! {
    /// The `TransactionDeposited` event emitted by OptimismPortal on L1.
    #[derive(Debug)]
    event TransactionDeposited(
        address indexed from,
        address indexed to,
        uint256 indexed version,
        bytes opaqueData
    );
}
