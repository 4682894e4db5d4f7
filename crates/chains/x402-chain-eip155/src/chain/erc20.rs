use alloy_sol_types::sol;

sol!(
    /// Minimal ERC-20 surface needed for balance checks ahead of a Permit2 transfer.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
);
