//! Minimal ABIs for the two aggregator generations and their proxy.
//!
//! v3 (FluxAggregator) submits individual answers on-chain and reverts
//! `getRoundData` until consensus; v4 (OCR) posts one `NewTransmission`
//! per round carrying every observation.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract AggregatorV3 {
        event SubmissionReceived(
            int256 indexed submission,
            uint32 indexed round,
            address indexed oracle
        );

        function getOracles() external view returns (address[] memory);
        function latestRoundData()
            external
            view
            returns (
                uint80 roundId,
                int256 answer,
                uint256 startedAt,
                uint256 updatedAt,
                uint80 answeredInRound
            );
        function getRoundData(uint80 _roundId)
            external
            view
            returns (
                uint80 roundId,
                int256 answer,
                uint256 startedAt,
                uint256 updatedAt,
                uint80 answeredInRound
            );
        function withdrawablePayment(address _oracle) external view returns (uint256);
    }

    #[sol(rpc)]
    contract AggregatorV4 {
        event NewTransmission(
            uint32 indexed aggregatorRoundId,
            int192 answer,
            address transmitter,
            int192[] observations,
            bytes observers,
            bytes32 rawReportContext
        );

        function transmitters() external view returns (address[] memory);
        function latestRoundData()
            external
            view
            returns (
                uint80 roundId,
                int256 answer,
                uint256 startedAt,
                uint256 updatedAt,
                uint80 answeredInRound
            );
        function getRoundData(uint80 _roundId)
            external
            view
            returns (
                uint80 roundId,
                int256 answer,
                uint256 startedAt,
                uint256 updatedAt,
                uint80 answeredInRound
            );
        function owedPayment(address _transmitter) external view returns (uint256);
    }

    #[sol(rpc)]
    contract AggregatorProxy {
        function aggregator() external view returns (address);
        function description() external view returns (string memory);
    }
}
