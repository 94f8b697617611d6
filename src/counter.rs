//! Binding for the on-chain counter contract.

use alloy::sol;

sol! {
    /// Minimal counter: a single unsigned integer that anyone can increment.
    #[sol(rpc)]
    contract Counter {
        event CounterIncremented(uint256 newCount, address incrementedBy);

        function count() external view returns (uint256);
        function getCount() external view returns (uint256);
        function increment() external;
    }
}
