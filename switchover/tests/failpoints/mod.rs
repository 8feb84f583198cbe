mod execute_test;
